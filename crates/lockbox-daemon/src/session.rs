//! In-memory storage of secure session details.
//!
//! The daemon owns exactly one [`Session`]. It starts logged out, is filled
//! once by [`Session::set`], and is emptied by [`Session::logout`]. Every
//! accessor takes the same lock, so a reader racing a `set` or `logout`
//! sees either the whole old session or the whole new one.

use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use lockbox_core::{IdentityId, MasterKey, PrincipalEnvelope};
use lockbox_registry::TokenSource;
use tracing::info;

use crate::error::SessionError;

type Result<T> = std::result::Result<T, SessionError>;

/// The kind of principal a session can be set for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionType {
    User,
    Machine,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::User => "user",
            SessionType::Machine => "machine",
        }
    }
}

impl FromStr for SessionType {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(SessionType::User),
            "machine" => Ok(SessionType::Machine),
            other => Err(SessionError::UnknownType(other.to_string())),
        }
    }
}

/// Current state of the session slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    LoggedOut,
    LoggedIn(SessionType),
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::LoggedOut => "no_session",
            SessionKind::LoggedIn(t) => t.as_str(),
        }
    }
}

#[derive(Default)]
struct Slot {
    active: Option<Active>,
}

struct Active {
    kind: SessionType,
    identity: PrincipalEnvelope,
    auth: PrincipalEnvelope,
    token: String,
    passphrase: String,
}

/// The daemon's session slot.
pub struct Session {
    slot: Mutex<Slot>,
}

impl Session {
    /// An empty, logged out session.
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn kind(&self) -> SessionKind {
        match &self.lock().active {
            Some(a) => SessionKind::LoggedIn(a.kind),
            None => SessionKind::LoggedOut,
        }
    }

    /// Id of the identity object: the user or the machine.
    pub fn id(&self) -> Option<IdentityId> {
        self.lock().active.as_ref().map(|a| a.identity.id())
    }

    /// Id of the object used for authorization: the user or the machine
    /// token.
    pub fn auth_id(&self) -> Option<IdentityId> {
        self.lock().active.as_ref().map(|a| a.auth.id())
    }

    pub fn identity(&self) -> Option<PrincipalEnvelope> {
        self.lock().active.as_ref().map(|a| a.identity.clone())
    }

    /// The bearer token, empty when logged out.
    pub fn token(&self) -> String {
        self.lock()
            .active
            .as_ref()
            .map(|a| a.token.clone())
            .unwrap_or_default()
    }

    /// The passphrase, empty when logged out.
    pub fn passphrase(&self) -> String {
        self.lock()
            .active
            .as_ref()
            .map(|a| a.passphrase.clone())
            .unwrap_or_default()
    }

    pub fn has_token(&self) -> bool {
        self.lock().active.is_some()
    }

    pub fn has_passphrase(&self) -> bool {
        self.lock().active.is_some()
    }

    /// The sealed master key carried by the auth body.
    pub fn master_key(&self) -> Result<MasterKey> {
        let slot = self.lock();
        let active = slot.active.as_ref().ok_or(SessionError::NotLoggedIn)?;
        match (active.kind, &active.auth) {
            (SessionType::User, PrincipalEnvelope::User(user)) => Ok(user.body.master.clone()),
            (SessionType::Machine, PrincipalEnvelope::MachineToken(token)) => {
                Ok(token.body.master.clone())
            }
            // `set` only admits matching shapes.
            _ => Err(SessionError::InvalidIdentity(
                "auth body does not match session type".into(),
            )),
        }
    }

    /// Atomically fill the session.
    pub fn set(
        &self,
        kind: SessionType,
        identity: Option<PrincipalEnvelope>,
        auth: Option<PrincipalEnvelope>,
        passphrase: &str,
        token: &str,
    ) -> Result<()> {
        let mut slot = self.lock();
        if slot.active.is_some() {
            return Err(SessionError::AlreadyLoggedIn);
        }

        let (identity, auth) = match (identity, auth) {
            (Some(identity), Some(auth)) => (identity, auth),
            _ => {
                return Err(SessionError::InvalidIdentity(
                    "identity and auth are required".into(),
                ))
            }
        };
        check_shape(kind, &identity, &auth)?;

        if passphrase.is_empty() || token.is_empty() {
            return Err(SessionError::EmptyCredential);
        }

        info!(session_type = kind.as_str(), id = %identity.id(), "session set");
        slot.active = Some(Active {
            kind,
            identity,
            auth,
            token: token.to_string(),
            passphrase: passphrase.to_string(),
        });
        Ok(())
    }

    /// Return to the logged out state.
    pub fn logout(&self) -> Result<()> {
        let mut slot = self.lock();
        let active = slot.active.take().ok_or(SessionError::NotLoggedIn)?;
        info!(session_type = active.kind.as_str(), id = %active.identity.id(), "session cleared");
        Ok(())
    }
}

fn check_shape(kind: SessionType, identity: &PrincipalEnvelope, auth: &PrincipalEnvelope) -> Result<()> {
    match (kind, identity, auth) {
        (SessionType::User, PrincipalEnvelope::User(_), PrincipalEnvelope::User(_)) => Ok(()),
        (SessionType::Machine, PrincipalEnvelope::Machine(machine), PrincipalEnvelope::MachineToken(token)) => {
            if token.body.machine_id != machine.id {
                return Err(SessionError::InvalidIdentity(format!(
                    "machine token belongs to {}, not {}",
                    token.body.machine_id, machine.id
                )));
            }
            Ok(())
        }
        (SessionType::User, _, _) => Err(SessionError::InvalidIdentity(format!(
            "user session needs user identity and auth, got {} and {}",
            identity.kind(),
            auth.kind()
        ))),
        (SessionType::Machine, _, _) => Err(SessionError::InvalidIdentity(format!(
            "machine session needs machine identity and machine_token auth, got {} and {}",
            identity.kind(),
            auth.kind()
        ))),
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenSource for Session {
    fn token(&self) -> String {
        Session::token(self)
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.lock();
        let (kind, logged_in) = match &slot.active {
            Some(a) => (a.kind.as_str(), true),
            None => (SessionKind::LoggedOut.as_str(), false),
        };
        write!(
            f,
            "Session{{type:{},token:{},passphrase:{}}}",
            kind, logged_in, logged_in
        )
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.lock();
        f.debug_struct("Session")
            .field("kind", &slot.active.as_ref().map(|a| a.kind))
            .field("id", &slot.active.as_ref().map(|a| a.identity.id()))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockbox_testkit::TestIdentity;
    use std::sync::Arc;

    fn set_user(session: &Session, who: &TestIdentity) -> Result<()> {
        let parts = who.user_session();
        session.set(
            SessionType::User,
            Some(parts.identity),
            Some(parts.auth),
            &parts.passphrase,
            &parts.token,
        )
    }

    #[test]
    fn test_starts_logged_out() {
        let session = Session::new();
        assert_eq!(session.kind(), SessionKind::LoggedOut);
        assert!(!session.has_token());
        assert!(!session.has_passphrase());
        assert_eq!(session.token(), "");
        assert_eq!(session.id(), None);
        assert_eq!(session.master_key(), Err(SessionError::NotLoggedIn));
    }

    #[test]
    fn test_set_then_read_back() {
        let alice = TestIdentity::new("alice");
        let session = Session::new();
        set_user(&session, &alice).unwrap();

        assert_eq!(session.kind(), SessionKind::LoggedIn(SessionType::User));
        assert_eq!(session.token(), alice.token());
        assert_eq!(session.passphrase(), alice.passphrase);
        assert_eq!(session.id(), Some(alice.id()));
        assert_eq!(session.auth_id(), Some(alice.id()));
        assert_eq!(session.master_key().unwrap(), alice.master);
    }

    #[test]
    fn test_second_set_fails() {
        let alice = TestIdentity::new("alice");
        let bob = TestIdentity::new("bob");
        let session = Session::new();
        set_user(&session, &alice).unwrap();

        assert_eq!(set_user(&session, &bob), Err(SessionError::AlreadyLoggedIn));
        assert_eq!(session.id(), Some(alice.id()));
    }

    #[test]
    fn test_logout() {
        let alice = TestIdentity::new("alice");
        let session = Session::new();
        assert_eq!(session.logout(), Err(SessionError::NotLoggedIn));

        set_user(&session, &alice).unwrap();
        session.logout().unwrap();
        assert!(!session.has_token());
        assert!(!session.has_passphrase());
        assert_eq!(session.logout(), Err(SessionError::NotLoggedIn));

        // A fresh set is allowed again.
        set_user(&session, &alice).unwrap();
    }

    #[test]
    fn test_shape_checks() {
        let alice = TestIdentity::new("alice");
        let bot = TestIdentity::new("bot");
        let session = Session::new();
        let user = alice.user_session();
        let machine = bot.machine_session(alice.id());

        let err = session
            .set(SessionType::Machine, Some(user.identity.clone()), Some(user.auth.clone()), "p", "t")
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidIdentity(_)));

        let err = session
            .set(SessionType::User, Some(machine.identity.clone()), Some(machine.auth.clone()), "p", "t")
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidIdentity(_)));

        let err = session
            .set(SessionType::User, Some(user.identity.clone()), None, "p", "t")
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidIdentity(_)));

        assert_eq!(session.kind(), SessionKind::LoggedOut);
    }

    #[test]
    fn test_machine_token_must_belong_to_machine() {
        let owner = TestIdentity::new("owner");
        let session = Session::new();
        let ci = TestIdentity::new("ci").machine_session(owner.id());
        let deploy = TestIdentity::new("deploy").machine_session(owner.id());

        // The ci machine presenting the deploy machine's token.
        let err = session
            .set(SessionType::Machine, Some(ci.identity.clone()), Some(deploy.auth.clone()), "p", "t")
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidIdentity(_)));
        assert_eq!(session.kind(), SessionKind::LoggedOut);

        session
            .set(SessionType::Machine, Some(ci.identity), Some(ci.auth), "p", "t")
            .unwrap();
        assert_eq!(session.kind(), SessionKind::LoggedIn(SessionType::Machine));
    }

    #[test]
    fn test_empty_credentials_rejected() {
        let alice = TestIdentity::new("alice");
        let session = Session::new();
        let parts = alice.user_session();

        for (passphrase, token) in [("", "t"), ("p", ""), ("", "")] {
            let err = session
                .set(
                    SessionType::User,
                    Some(parts.identity.clone()),
                    Some(parts.auth.clone()),
                    passphrase,
                    token,
                )
                .unwrap_err();
            assert_eq!(err, SessionError::EmptyCredential);
        }
    }

    #[test]
    fn test_machine_master_key_comes_from_token() {
        let owner = TestIdentity::new("owner");
        let bot = TestIdentity::new("bot");
        let parts = bot.machine_session(owner.id());
        let session = Session::new();
        session
            .set(SessionType::Machine, Some(parts.identity.clone()), Some(parts.auth.clone()), &parts.passphrase, &parts.token)
            .unwrap();

        assert_eq!(session.master_key().unwrap(), bot.master);
        assert_eq!(session.auth_id(), Some(bot.id()));
        assert_eq!(session.id(), Some(parts.identity.id()));
        assert_ne!(session.id(), session.auth_id());
    }

    #[test]
    fn test_session_type_parsing() {
        assert_eq!("user".parse::<SessionType>(), Ok(SessionType::User));
        assert_eq!("machine".parse::<SessionType>(), Ok(SessionType::Machine));
        assert_eq!(
            "robot".parse::<SessionType>(),
            Err(SessionError::UnknownType("robot".into()))
        );
    }

    #[test]
    fn test_display_and_debug_redact_secrets() {
        let alice = TestIdentity::new("alice");
        let session = Session::new();
        assert_eq!(session.to_string(), "Session{type:no_session,token:false,passphrase:false}");

        set_user(&session, &alice).unwrap();
        assert_eq!(session.to_string(), "Session{type:user,token:true,passphrase:true}");

        let debug = format!("{:?}", session);
        assert!(!debug.contains(&alice.passphrase));
        assert!(!debug.contains(&alice.token()));
    }

    #[test]
    fn test_concurrent_readers_never_see_partial_state() {
        let alice = TestIdentity::new("alice");
        let parts = alice.user_session();
        let session = Arc::new(Session::new());

        std::thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..200 {
                    session
                        .set(SessionType::User, Some(parts.identity.clone()), Some(parts.auth.clone()), &parts.passphrase, &parts.token)
                        .unwrap();
                    session.logout().unwrap();
                }
            });
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..200 {
                        let rendered = session.to_string();
                        assert!(
                            rendered == "Session{type:no_session,token:false,passphrase:false}"
                                || rendered == "Session{type:user,token:true,passphrase:true}",
                            "torn read: {}",
                            rendered
                        );
                    }
                });
            }
        });
    }

    proptest::proptest! {
        #[test]
        fn set_returns_supplied_secrets(passphrase in ".{1,40}", token in "[A-Za-z0-9._-]{1,64}") {
            let alice = TestIdentity::with_seed("alice", [9; 32]);
            let parts = alice.user_session();
            let session = Session::new();
            session
                .set(SessionType::User, Some(parts.identity.clone()), Some(parts.auth.clone()), &passphrase, &token)
                .unwrap();
            proptest::prop_assert_eq!(session.token(), token);
            proptest::prop_assert_eq!(session.passphrase(), passphrase);
            proptest::prop_assert_eq!(
                session.set(SessionType::User, Some(parts.identity), Some(parts.auth), "p", "t"),
                Err(SessionError::AlreadyLoggedIn)
            );
            session.logout().unwrap();
            proptest::prop_assert!(!session.has_token() && !session.has_passphrase());
        }
    }
}
