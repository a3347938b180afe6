//! Accounts, passwords and bearer sessions.
//!
//! Passwords are stored as Argon2 PHC strings. A session token is 32 random
//! bytes, hex-encoded, handed to the client once; only its BLAKE3 hash is
//! stored.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::User;
use crate::storage::Storage;

const TOKEN_BYTES: usize = 32;

/// Message returned for any failed login.
pub const INVALID_CREDENTIALS: &str = "Invalid credentials";

/// Session and password rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthPolicy {
    /// How long a session stays valid.
    pub session_ttl: Duration,
    /// Minimum password length in characters.
    pub min_password_len: usize,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for AuthPolicy {
    fn from(config: &Config) -> Self {
        Self {
            session_ttl: config.session_ttl(),
            min_password_len: config.auth.min_password_len,
        }
    }
}

/// Body of a registration request.
#[derive(Debug, Clone, Deserialize)]
pub struct Registration {
    /// Desired username.
    pub username: String,
    /// Email address.
    pub email: String,
    /// Plain-text password.
    pub password: String,
}

/// Body of a login request.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    /// Email address.
    pub email: String,
    /// Plain-text password.
    pub password: String,
}

/// A freshly issued session.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    /// Bearer token for the `Authorization` header.
    pub token: String,
    /// The signed-in user.
    pub user: User,
}

/// Hash a password into an Argon2 PHC string.
///
/// # Errors
///
/// Returns [`Error::Credentials`] if hashing fails.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::Credentials(e.to_string()))
}

/// Check a password against a stored PHC string.
///
/// # Errors
///
/// Returns [`Error::Credentials`] if the stored hash cannot be parsed.
pub fn verify_password(password: &str, stored: &str) -> Result<bool> {
    let parsed = PasswordHash::new(stored).map_err(|e| Error::Credentials(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// A new random session token.
#[must_use]
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// The stored form of a session token.
#[must_use]
pub fn hash_token(token: &str) -> String {
    blake3::hash(token.as_bytes()).to_hex().to_string()
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// A validated registration whose password has already been hashed.
#[derive(Debug, Clone)]
pub struct NewAccount {
    /// Trimmed username.
    pub username: String,
    /// Lowercased email.
    pub email: String,
    /// Argon2 PHC string.
    pub password_hash: String,
}

/// Validate a registration and hash its password.
///
/// This is the CPU-heavy half of [`register`] and touches no storage.
///
/// # Errors
///
/// Returns [`Error::Invalid`] when a field is missing or malformed.
pub fn prepare_account(policy: &AuthPolicy, registration: &Registration) -> Result<NewAccount> {
    let username = registration.username.trim();
    let email = normalize_email(&registration.email);

    if username.is_empty() {
        return Err(Error::invalid("Username is required"));
    }
    if email.is_empty() || !email.contains('@') {
        return Err(Error::invalid("A valid email is required"));
    }
    if registration.password.chars().count() < policy.min_password_len {
        return Err(Error::invalid(format!(
            "Password must be at least {} characters",
            policy.min_password_len
        )));
    }

    Ok(NewAccount {
        username: username.to_string(),
        email,
        password_hash: hash_password(&registration.password)?,
    })
}

/// Store a prepared account and sign it in.
///
/// # Errors
///
/// Returns [`Error::Invalid`] ("User already exists") when the username or
/// email is already registered.
pub fn create_account(
    storage: &Storage,
    policy: &AuthPolicy,
    account: &NewAccount,
    now: DateTime<Utc>,
) -> Result<Session> {
    if storage.find_user_by_email(&account.email)?.is_some()
        || storage.find_user_by_username(&account.username)?.is_some()
    {
        return Err(Error::invalid("User already exists"));
    }

    let session = storage
        .transaction(|s| {
            let user = s.create_user(
                &account.username,
                &account.email,
                &account.password_hash,
                now,
            )?;
            let token = start_session(s, policy, user.id, now)?;
            Ok(Session { token, user })
        })
        .map_err(|e| {
            if e.is_unique_violation() {
                Error::invalid("User already exists")
            } else {
                e
            }
        })?;

    info!("Registered user {} ({})", session.user.username, session.user.id);
    Ok(session)
}

/// Create an account and sign it in.
///
/// # Errors
///
/// See [`prepare_account`] and [`create_account`].
pub fn register(
    storage: &Storage,
    policy: &AuthPolicy,
    registration: &Registration,
    now: DateTime<Utc>,
) -> Result<Session> {
    let account = prepare_account(policy, registration)?;
    create_account(storage, policy, &account, now)
}

/// The account a login attempt names, if any.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn find_login(storage: &Storage, credentials: &Credentials) -> Result<Option<User>> {
    storage.find_user_by_email(&normalize_email(&credentials.email))
}

/// Check a login attempt against the account [`find_login`] returned.
///
/// Runs Argon2 and touches no storage.
///
/// # Errors
///
/// Returns [`Error::Unauthorized`] with [`INVALID_CREDENTIALS`] when there
/// is no account or the password does not match.
pub fn check_login(user: Option<User>, credentials: &Credentials) -> Result<User> {
    let Some(user) = user else {
        return Err(Error::unauthorized(INVALID_CREDENTIALS));
    };
    if !verify_password(&credentials.password, &user.password_hash)? {
        return Err(Error::unauthorized(INVALID_CREDENTIALS));
    }
    Ok(user)
}

/// Open a session for a user whose password was checked.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn open_session(
    storage: &Storage,
    policy: &AuthPolicy,
    user: User,
    now: DateTime<Utc>,
) -> Result<Session> {
    let token = start_session(storage, policy, user.id, now)?;
    info!("User {} signed in", user.id);
    Ok(Session { token, user })
}

/// Sign in with email and password.
///
/// # Errors
///
/// Returns [`Error::Unauthorized`] with [`INVALID_CREDENTIALS`] when the
/// email is unknown or the password does not match.
pub fn login(
    storage: &Storage,
    policy: &AuthPolicy,
    credentials: &Credentials,
    now: DateTime<Utc>,
) -> Result<Session> {
    let user = check_login(find_login(storage, credentials)?, credentials)?;
    open_session(storage, policy, user, now)
}

fn start_session(
    storage: &Storage,
    policy: &AuthPolicy,
    user_id: i64,
    now: DateTime<Utc>,
) -> Result<String> {
    let token = generate_token();
    storage.create_session(&hash_token(&token), user_id, now, now + policy.session_ttl)?;
    Ok(token)
}

/// The user owning `token`, if the session is live.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn authenticate(storage: &Storage, token: &str, now: DateTime<Utc>) -> Result<Option<User>> {
    storage.user_for_session(&hash_token(token), now)
}

/// End the session identified by `token`.
///
/// Returns `false` if there was no such session.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn logout(storage: &Storage, token: &str) -> Result<bool> {
    storage.delete_session(&hash_token(token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::storage;

    fn registration(username: &str, email: &str, password: &str) -> Registration {
        Registration {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    #[test]
    fn test_password_round_trip() {
        let hash = hash_password("hunter22").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("hunter22", &hash).unwrap());
        assert!(!verify_password("hunter23", &hash).unwrap());
    }

    #[test]
    fn test_verify_rejects_garbage_hash() {
        assert!(matches!(
            verify_password("x", "not-a-phc-string"),
            Err(Error::Credentials(_))
        ));
    }

    #[test]
    fn test_tokens() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), TOKEN_BYTES * 2);
        assert_ne!(a, b);
        assert_eq!(hash_token(&a), hash_token(&a));
        assert_ne!(hash_token(&a), a);
    }

    #[test]
    fn test_register_then_authenticate() {
        let storage = storage();
        let now = Utc::now();
        let session = register(
            &storage,
            &AuthPolicy::default(),
            &registration("  alice ", " Alice@Example.COM", "secret1"),
            now,
        )
        .unwrap();

        assert_eq!(session.user.username, "alice");
        assert_eq!(session.user.email, "alice@example.com");
        let user = authenticate(&storage, &session.token, now).unwrap().unwrap();
        assert_eq!(user.id, session.user.id);
    }

    #[test]
    fn test_register_validation() {
        let storage = storage();
        let policy = AuthPolicy::default();
        let now = Utc::now();

        let short = register(&storage, &policy, &registration("a", "a@x.io", "12345"), now);
        assert!(short.unwrap_err().is_invalid());

        let no_name = register(&storage, &policy, &registration(" ", "a@x.io", "123456"), now);
        assert!(no_name.unwrap_err().is_invalid());

        let bad_email = register(&storage, &policy, &registration("a", "nope", "123456"), now);
        assert!(bad_email.unwrap_err().is_invalid());
    }

    #[test]
    fn test_register_duplicate() {
        let storage = storage();
        let policy = AuthPolicy::default();
        let now = Utc::now();
        register(&storage, &policy, &registration("alice", "alice@x.io", "123456"), now).unwrap();

        let same_email = register(&storage, &policy, &registration("other", "ALICE@x.io", "123456"), now);
        assert_eq!(same_email.unwrap_err().to_string(), "User already exists");

        let same_name = register(&storage, &policy, &registration("alice", "new@x.io", "123456"), now);
        assert_eq!(same_name.unwrap_err().to_string(), "User already exists");
    }

    #[test]
    fn test_prepare_account_hashes_without_storage() {
        let account = prepare_account(
            &AuthPolicy::default(),
            &registration(" bob ", "Bob@X.io", "123456"),
        )
        .unwrap();
        assert_eq!(account.username, "bob");
        assert_eq!(account.email, "bob@x.io");
        assert!(verify_password("123456", &account.password_hash).unwrap());

        let storage = storage();
        let session =
            create_account(&storage, &AuthPolicy::default(), &account, Utc::now()).unwrap();
        assert_eq!(session.user.username, "bob");

        let again = create_account(&storage, &AuthPolicy::default(), &account, Utc::now());
        assert_eq!(again.unwrap_err().to_string(), "User already exists");
    }

    #[test]
    fn test_check_login() {
        let credentials = Credentials {
            email: "bob@x.io".to_string(),
            password: "123456".to_string(),
        };
        assert!(matches!(
            check_login(None, &credentials),
            Err(Error::Unauthorized(_))
        ));
    }

    #[test]
    fn test_login() {
        let storage = storage();
        let policy = AuthPolicy::default();
        let now = Utc::now();
        register(&storage, &policy, &registration("alice", "alice@x.io", "123456"), now).unwrap();

        let ok = login(
            &storage,
            &policy,
            &Credentials {
                email: "Alice@x.io".to_string(),
                password: "123456".to_string(),
            },
            now,
        )
        .unwrap();
        assert_eq!(ok.user.username, "alice");

        for (email, password) in [("alice@x.io", "wrong!"), ("bob@x.io", "123456")] {
            let err = login(
                &storage,
                &policy,
                &Credentials {
                    email: email.to_string(),
                    password: password.to_string(),
                },
                now,
            )
            .unwrap_err();
            assert!(matches!(err, Error::Unauthorized(_)));
            assert_eq!(err.to_string(), INVALID_CREDENTIALS);
        }
    }

    #[test]
    fn test_session_expiry_and_logout() {
        let storage = storage();
        let policy = AuthPolicy {
            session_ttl: Duration::hours(1),
            ..AuthPolicy::default()
        };
        let now = Utc::now();
        let session =
            register(&storage, &policy, &registration("alice", "alice@x.io", "123456"), now).unwrap();

        assert!(authenticate(&storage, &session.token, now + Duration::hours(2))
            .unwrap()
            .is_none());

        assert!(logout(&storage, &session.token).unwrap());
        assert!(!logout(&storage, &session.token).unwrap());
        assert!(authenticate(&storage, &session.token, now).unwrap().is_none());
    }
}
