//! Signed-in identity and the reaction to authorization failures.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex, PoisonError, Weak,
};

use tokio::{sync::watch, task::JoinHandle};

use crate::error::PortalError;
use crate::infra::transport::BoxFuture;

/// The signed-in user as the identity provider reports it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthUser {
    pub email: String,
    pub display_name: Option<String>,
}

/// External identity provider. The portal never sees passwords; it only asks
/// for a fresh ID token per request and tells the provider to sign out.
pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Option<AuthUser>;

    fn id_token(&self, force_refresh: bool) -> BoxFuture<'_, Result<String, PortalError>>;

    fn sign_out(&self) -> BoxFuture<'_, Result<(), PortalError>>;

    /// Emits whenever the signed-in user changes.
    fn watch_user(&self) -> watch::Receiver<Option<AuthUser>>;
}

/// Callback run once per forced sign-out.
pub type SessionHook = Arc<dyn Fn() + Send + Sync>;

pub struct Session {
    provider: Arc<dyn IdentityProvider>,
    revoked: AtomicBool,
    hooks: Mutex<Vec<SessionHook>>,
    tracker: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            provider,
            revoked: AtomicBool::new(false),
            hooks: Mutex::new(Vec::new()),
            tracker: Mutex::new(None),
        }
    }

    /// Run `hook` after a forced sign-out, e.g. to redirect to the login screen.
    pub fn on_sign_out(&self, hook: SessionHook) {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hook);
    }

    /// Start following the provider's user changes. A newly signed-in user lifts
    /// the fail-fast state left by a previous authorization failure.
    pub fn init(self: &Arc<Self>) {
        let mut users = self.provider.watch_user();
        let session: Weak<Session> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while users.changed().await.is_ok() {
                let user = users.borrow_and_update().clone();
                let Some(session) = session.upgrade() else {
                    break;
                };
                match user {
                    Some(user) => {
                        tracing::info!(email = %user.email, "identity established");
                        session.revoked.store(false, Ordering::SeqCst);
                    }
                    None => tracing::info!("identity cleared"),
                }
            }
        });

        let previous = self
            .tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Stop following user changes. Safe to call more than once.
    pub fn teardown(&self) {
        if let Some(task) = self
            .tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }

    pub fn current_user(&self) -> Option<AuthUser> {
        self.provider.current_user()
    }

    pub fn email(&self) -> Option<String> {
        self.current_user().map(|user| user.email)
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::SeqCst)
    }

    /// Fresh bearer token for a protected request. Fails fast after an
    /// authorization failure until a new identity is established.
    pub async fn bearer(&self) -> Result<String, PortalError> {
        if self.is_revoked() {
            return Err(PortalError::Auth { status: 401 });
        }
        if self.provider.current_user().is_none() {
            return Err(PortalError::Auth { status: 401 });
        }
        self.provider.id_token(true).await
    }

    /// React to a 401/403. Only the first failure signs out and fires the hooks.
    pub async fn handle_unauthorized(&self, status: u16) {
        if self
            .revoked
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        tracing::warn!(status, "authorization rejected, signing out");
        if let Err(err) = self.provider.sign_out().await {
            tracing::error!(error = %err, "sign-out failed");
        }

        let hooks = self
            .hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for hook in hooks {
            hook();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Provider backed by a fixed token, for the command line and tests.
pub struct StaticTokenProvider {
    token: Option<String>,
    user: watch::Sender<Option<AuthUser>>,
    sign_outs: AtomicUsize,
}

impl StaticTokenProvider {
    pub fn new(user: Option<AuthUser>, token: Option<String>) -> Self {
        Self {
            token,
            user: watch::channel(user).0,
            sign_outs: AtomicUsize::new(0),
        }
    }

    pub fn anonymous() -> Self {
        Self::new(None, None)
    }

    /// Switch to another signed-in user.
    pub fn sign_in(&self, user: AuthUser) {
        self.user.send_replace(Some(user));
    }

    pub fn sign_out_count(&self) -> usize {
        self.sign_outs.load(Ordering::SeqCst)
    }
}

impl IdentityProvider for StaticTokenProvider {
    fn current_user(&self) -> Option<AuthUser> {
        self.user.borrow().clone()
    }

    fn id_token(&self, _force_refresh: bool) -> BoxFuture<'_, Result<String, PortalError>> {
        let token = self.token.clone();
        Box::pin(async move { token.ok_or(PortalError::Auth { status: 401 }) })
    }

    fn sign_out(&self) -> BoxFuture<'_, Result<(), PortalError>> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        self.user.send_replace(None);
        Box::pin(async { Ok(()) })
    }

    fn watch_user(&self) -> watch::Receiver<Option<AuthUser>> {
        self.user.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn alice() -> AuthUser {
        AuthUser {
            email: "alice@example.com".into(),
            display_name: Some("Alice".into()),
        }
    }

    #[tokio::test]
    async fn unauthorized_signs_out_once() {
        let provider = Arc::new(StaticTokenProvider::new(Some(alice()), Some("t0k".into())));
        let session = Session::new(provider.clone());
        let redirects = Arc::new(AtomicUsize::new(0));
        session.on_sign_out({
            let redirects = redirects.clone();
            Arc::new(move || {
                redirects.fetch_add(1, Ordering::SeqCst);
            })
        });

        assert_eq!(session.bearer().await, Ok("t0k".to_string()));

        session.handle_unauthorized(401).await;
        session.handle_unauthorized(403).await;

        assert_eq!(provider.sign_out_count(), 1);
        assert_eq!(redirects.load(Ordering::SeqCst), 1);
        assert_eq!(session.bearer().await, Err(PortalError::Auth { status: 401 }));
    }

    #[tokio::test]
    async fn anonymous_session_has_no_bearer() {
        let session = Session::new(Arc::new(StaticTokenProvider::anonymous()));
        assert!(session.bearer().await.is_err());
        assert!(session.email().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn new_identity_lifts_revocation() {
        let provider = Arc::new(StaticTokenProvider::new(Some(alice()), Some("t0k".into())));
        let session = Arc::new(Session::new(provider.clone()));
        session.init();

        session.handle_unauthorized(401).await;
        assert!(session.is_revoked());

        provider.sign_in(alice());
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(!session.is_revoked());

        session.teardown();
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_stops_following_the_provider() {
        let provider = Arc::new(StaticTokenProvider::new(Some(alice()), Some("t0k".into())));
        let session = Arc::new(Session::new(provider.clone()));
        session.init();
        session.teardown();
        session.teardown();

        session.handle_unauthorized(401).await;
        provider.sign_in(alice());
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(session.is_revoked());
    }
}
