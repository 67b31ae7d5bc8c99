use tokio::sync::watch;
use tracing::debug;

use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Authenticated,
    Unauthenticated,
}

impl From<&Session> for AuthState {
    fn from(session: &Session) -> Self {
        if session.is_logged_in() {
            Self::Authenticated
        } else {
            Self::Unauthenticated
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Home,
    Login,
    Register,
    Chats,
    Chat { chat_id: String },
    Profile,
    Error,
    NotFound,
}

impl Route {
    /// Match a path against the route table. Trailing slashes are ignored.
    pub fn parse(path: &str) -> Option<Self> {
        if !path.starts_with('/') {
            return None;
        }
        let segments: Vec<&str> = path.trim_end_matches('/').split('/').skip(1).collect();

        match segments.as_slice() {
            [] => Some(Self::Home),
            ["login"] => Some(Self::Login),
            ["register"] => Some(Self::Register),
            ["chats"] => Some(Self::Chats),
            ["chats", id] if !id.is_empty() => Some(Self::Chat {
                chat_id: id.to_string(),
            }),
            ["profile"] => Some(Self::Profile),
            ["error"] => Some(Self::Error),
            ["error", "404"] => Some(Self::NotFound),
            _ => None,
        }
    }

    pub fn path(&self) -> String {
        match self {
            Self::Home => "/".into(),
            Self::Login => "/login".into(),
            Self::Register => "/register".into(),
            Self::Chats => "/chats".into(),
            Self::Chat { chat_id } => format!("/chats/{}", chat_id),
            Self::Profile => "/profile".into(),
            Self::Error => "/error".into(),
            Self::NotFound => "/error/404".into(),
        }
    }

    pub fn allowed_in(&self, state: AuthState) -> bool {
        match self {
            Self::Home | Self::Login | Self::Register => state == AuthState::Unauthenticated,
            Self::Chats | Self::Chat { .. } | Self::Profile => state == AuthState::Authenticated,
            Self::Error | Self::NotFound => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Allow(Route),
    Redirect(Route),
}

pub fn default_route(state: AuthState) -> Route {
    match state {
        AuthState::Authenticated => Route::Chats,
        AuthState::Unauthenticated => Route::Login,
    }
}

/// Decides where navigation may go, following the session.
pub struct RouteGuard {
    session: watch::Receiver<Session>,
    /// State last reported by `changed`.
    seen: AuthState,
}

impl RouteGuard {
    pub fn new(mut session: watch::Receiver<Session>) -> Self {
        let seen = AuthState::from(&*session.borrow_and_update());
        Self { session, seen }
    }

    pub fn state(&self) -> AuthState {
        AuthState::from(&*self.session.borrow())
    }

    pub fn resolve(&self, path: &str) -> Navigation {
        let state = self.state();
        let navigation = match Route::parse(path) {
            Some(route) if route.allowed_in(state) => Navigation::Allow(route),
            Some(_) => Navigation::Redirect(default_route(state)),
            None => Navigation::Redirect(Route::NotFound),
        };
        debug!(path, ?state, ?navigation, "route resolved");
        navigation
    }

    /// Wait for the next login or logout and return the new state. `None`
    /// once the session store is gone.
    pub async fn changed(&mut self) -> Option<AuthState> {
        loop {
            let now = AuthState::from(&*self.session.borrow_and_update());
            if now != self.seen {
                self.seen = now;
                return Some(now);
            }
            self.session.changed().await.ok()?;
        }
    }
}
