use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::context::NotificationContext;
use crate::registration::{PushRegistrationController, RegistrationResult};

enum Command {
    Logout(oneshot::Sender<()>),
}

/// Requests into a running [`SessionDriver`].
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
}

impl SessionHandle {
    /// Log out on this device. Unbinds the context and removes the device
    /// push token while the credentials are still valid; call it before the
    /// session provider clears the session. Returns once both are done.
    pub async fn logout(&self) {
        let (done, finished) = oneshot::channel();
        if self.commands.send(Command::Logout(done)).await.is_err() {
            tracing::debug!("session driver stopped, nothing to log out");
            return;
        }
        if finished.await.is_err() {
            tracing::debug!("session driver stopped during logout");
        }
    }
}

/// Keeps the notification context and push registration in step with the
/// session and tenant providers.
pub struct SessionDriver {
    context: NotificationContext,
    controller: Arc<PushRegistrationController>,
    user: Option<Uuid>,
    tenant: Option<Uuid>,
    /// Set by an explicit logout until the provider stops reporting that user.
    logged_out: Option<Uuid>,
    registration: Option<JoinHandle<RegistrationResult>>,
    commands: mpsc::Receiver<Command>,
    handle: SessionHandle,
}

impl SessionDriver {
    pub fn new(context: NotificationContext, controller: Arc<PushRegistrationController>) -> Self {
        let (tx, commands) = mpsc::channel(4);
        Self {
            context,
            controller,
            user: None,
            tenant: None,
            logged_out: None,
            registration: None,
            commands,
            handle: SessionHandle { commands: tx },
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Run until either provider goes away. Losing a provider is treated as
    /// losing the session: subscriptions are torn down and no further calls
    /// are issued.
    pub async fn run(
        mut self,
        mut session: watch::Receiver<Option<Uuid>>,
        mut tenant: watch::Receiver<Option<Uuid>>,
    ) {
        let mut rotations = self.controller.token_rotations().fuse();

        loop {
            let user_id = *session.borrow_and_update();
            let tenant_id = *tenant.borrow_and_update();
            self.apply(user_id, tenant_id);

            tokio::select! {
                changed = session.changed() => if changed.is_err() { break },
                changed = tenant.changed() => if changed.is_err() { break },
                Some(command) = self.commands.recv() => match command {
                    Command::Logout(done) => {
                        self.logout().await;
                        let _ = done.send(());
                    }
                },
                Some(token) = rotations.next() => self.rotate(token),
            }
        }

        tracing::info!("session provider closed, tearing down notifications");
        self.stop_registration();
        self.context.unbind();
    }

    fn stop_registration(&mut self) {
        if let Some(task) = self.registration.take() {
            task.abort();
        }
    }

    fn apply(&mut self, user_id: Option<Uuid>, tenant_id: Option<Uuid>) {
        if self.logged_out.is_some() && user_id != self.logged_out {
            self.logged_out = None;
        }
        let user_id = if self.logged_out.is_some() { None } else { user_id };

        if user_id != self.user {
            self.stop_registration();
            if let Some(previous) = self.user {
                // credentials may already belong to someone else, so the
                // registry is left alone here
                tracing::debug!(user_id = %previous, "session ended without logout, keeping device token");
                self.controller.forget_session();
            }
            if let Some(user) = user_id {
                let controller = self.controller.clone();
                self.registration = Some(tokio::spawn(async move {
                    let result = controller.start_session(user).await;
                    tracing::debug!(user_id = %user, result = ?result, "push registration finished");
                    result
                }));
            }
            self.user = user_id;
        }

        self.tenant = tenant_id;
        match (self.user, self.tenant) {
            (Some(user), Some(tenant)) => self.context.bind(tenant, user),
            _ => self.context.unbind(),
        }
    }

    async fn logout(&mut self) {
        self.stop_registration();
        self.context.unbind();
        if let Some(user) = self.user.take() {
            self.controller.end_session(user).await;
            self.logged_out = Some(user);
            tracing::info!(user_id = %user, "logged out on this device");
        }
    }

    fn rotate(&mut self, token: String) {
        let Some(user) = self.user else {
            tracing::debug!("push token rotated with no session");
            return;
        };
        self.stop_registration();
        let controller = self.controller.clone();
        self.registration = Some(tokio::spawn(async move {
            let result = controller.token_changed(user, &token).await;
            tracing::debug!(user_id = %user, result = ?result, "rotated push token reconciled");
            result
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
    use futures::stream::BoxStream;
    use parking_lot::Mutex;

    use fitclub_shared::types::{NotificationAction, NotificationType, Platform};

    use crate::backend::{PermissionStatus, PushPlatform};
    use crate::config::ClientConfig;
    use crate::context::{ContextState, Phase};
    use crate::error::ClientResult;
    use crate::http::HttpBackend;
    use crate::registration::PushStatus;
    use crate::test_support::{bearer_for, in_process, serve};

    struct StaticPlatform {
        token: String,
        rotations: Mutex<Option<UnboundedReceiver<String>>>,
    }

    impl StaticPlatform {
        fn new(token: &str) -> Arc<Self> {
            Arc::new(Self {
                token: token.to_string(),
                rotations: Mutex::new(None),
            })
        }

        fn rotating(token: &str) -> (Arc<Self>, UnboundedSender<String>) {
            let (tx, rx) = unbounded();
            let platform = Arc::new(Self {
                token: token.to_string(),
                rotations: Mutex::new(Some(rx)),
            });
            (platform, tx)
        }
    }

    #[async_trait]
    impl PushPlatform for StaticPlatform {
        fn platform(&self) -> Platform {
            Platform::Android
        }
        async fn request_permission(&self) -> ClientResult<PermissionStatus> {
            Ok(PermissionStatus::Granted)
        }
        async fn device_token(&self) -> ClientResult<String> {
            Ok(self.token.clone())
        }
        fn token_rotations(&self) -> BoxStream<'static, String> {
            match self.rotations.lock().take() {
                Some(rx) => rx.boxed(),
                None => futures::stream::pending().boxed(),
            }
        }
    }

    async fn wait_for(ctx: &NotificationContext, what: impl Fn(&ContextState) -> bool) {
        let mut rx = ctx.subscribe();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| what(s)))
            .await
            .expect("context state in time")
            .expect("context alive");
    }

    async fn wait_for_push(controller: &PushRegistrationController, what: impl Fn(&PushStatus) -> bool) {
        let mut rx = controller.status();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| what(s)))
            .await
            .expect("push status in time")
            .expect("controller alive");
    }

    #[tokio::test]
    async fn login_tenant_switch_and_logout() {
        let (backend, gym_a) = in_process().await;
        let gym_b = Uuid::new_v4();
        backend.state.notifications.register_tenant(gym_b, "Gym B").await.unwrap();
        backend
            .state
            .notifications
            .create(gym_a, NotificationType::Info, "A news", "body", NotificationAction::None)
            .await
            .unwrap();

        let context = NotificationContext::new(backend.clone(), backend.clone());
        let controller = Arc::new(PushRegistrationController::new(StaticPlatform::new("fcm-device-1"), backend.clone()));
        let (session_tx, session_rx) = watch::channel(None);
        let (tenant_tx, tenant_rx) = watch::channel(Some(gym_a));

        let driver = SessionDriver::new(context.clone(), controller.clone());
        let session = driver.handle();
        let handle = tokio::spawn(driver.run(session_rx, tenant_rx));

        let user = Uuid::new_v4();
        session_tx.send_replace(Some(user));
        wait_for(&context, |s| s.phase == Phase::Ready && s.unread_count == 1).await;
        wait_for_push(&controller, |s| s.is_push_registered).await;

        tenant_tx.send_replace(Some(gym_b));
        wait_for(&context, |s| {
            s.phase == Phase::Ready && s.scope.map(|sc| sc.tenant_id) == Some(gym_b)
        })
        .await;
        assert!(context.notifications().is_empty());

        session.logout().await;
        assert_eq!(context.phase(), Phase::Uninitialized);
        assert_eq!(controller.current_status(), PushStatus::default());
        assert!(!backend.state.push_tokens.is_token_registered(user, "fcm-device-1").await.unwrap());

        session_tx.send_replace(None);
        drop(session_tx);
        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn logout_over_http_removes_token_while_credentials_are_valid() {
        let (state, base_url) = serve().await;
        let gym = Uuid::new_v4();
        state.notifications.register_tenant(gym, "Harbour").await.unwrap();
        let user = Uuid::new_v4();

        let http = Arc::new(HttpBackend::new(&ClientConfig::default().with_base_url(base_url)).unwrap());
        http.set_access_token(Some(bearer_for(user, vec![gym])));

        let context = NotificationContext::new(http.clone(), http.clone());
        let controller = Arc::new(PushRegistrationController::new(StaticPlatform::new("apns-1"), http.clone()));
        let (session_tx, session_rx) = watch::channel(Some(user));
        let (_tenant_tx, tenant_rx) = watch::channel(Some(gym));

        let driver = SessionDriver::new(context.clone(), controller.clone());
        let session = driver.handle();
        let handle = tokio::spawn(driver.run(session_rx, tenant_rx));

        wait_for_push(&controller, |s| s.is_push_registered).await;
        wait_for(&context, |s| s.phase == Phase::Ready).await;
        assert!(state.push_tokens.is_token_registered(user, "apns-1").await.unwrap());

        session.logout().await;
        session_tx.send_replace(None);
        http.set_access_token(None);

        // the provider still reported the user for a moment; no re-registration
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!state.push_tokens.is_token_registered(user, "apns-1").await.unwrap());
        assert_eq!(context.phase(), Phase::Uninitialized);

        drop(session_tx);
        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn platform_rotation_reregisters_through_driver() {
        let (backend, gym) = in_process().await;
        let (platform, rotate) = StaticPlatform::rotating("fcm-1");
        let context = NotificationContext::new(backend.clone(), backend.clone());
        let controller = Arc::new(PushRegistrationController::new(platform, backend.clone()));
        let user = Uuid::new_v4();
        let (_session_tx, session_rx) = watch::channel(Some(user));
        let (_tenant_tx, tenant_rx) = watch::channel(Some(gym));

        tokio::spawn(SessionDriver::new(context, controller.clone()).run(session_rx, tenant_rx));
        wait_for_push(&controller, |s| s.is_push_registered && s.push_token.as_deref() == Some("fcm-1")).await;

        rotate.unbounded_send("fcm-2".into()).unwrap();
        wait_for_push(&controller, |s| s.is_push_registered && s.push_token.as_deref() == Some("fcm-2")).await;

        let mut tokens = Vec::new();
        for _ in 0..100 {
            tokens = backend
                .state
                .push_tokens
                .list_tokens(user)
                .await
                .unwrap()
                .into_iter()
                .map(|t| t.token)
                .collect::<Vec<_>>();
            if tokens == ["fcm-2"] {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(tokens, vec!["fcm-2".to_string()]);
    }

    #[tokio::test]
    async fn provider_loss_unbinds() {
        let (backend, gym) = in_process().await;
        let context = NotificationContext::new(backend.clone(), backend.clone());
        let controller = Arc::new(PushRegistrationController::new(StaticPlatform::new("fcm-device-1"), backend.clone()));
        let (session_tx, session_rx) = watch::channel(Some(Uuid::new_v4()));
        let (tenant_tx, tenant_rx) = watch::channel(Some(gym));

        let handle = tokio::spawn(SessionDriver::new(context.clone(), controller).run(session_rx, tenant_rx));
        wait_for(&context, |s| s.phase == Phase::Ready).await;

        drop(tenant_tx);
        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        assert_eq!(context.phase(), Phase::Uninitialized);
        drop(session_tx);
    }
}
