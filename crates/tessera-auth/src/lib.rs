//! Tessera Auth - credential and redemption tokens
//!
//! Every token family pairs a stateless check (HMAC or JWT signature) with
//! stateful single-use or expiry tracking in a shared [`EphemeralStore`]:
//! - [`SignedCodeCodec`] + [`RedemptionLedger`]: one-time premium codes
//! - [`TokenIssuer`] / [`TokenValidator`] + [`RevocationRegistry`]: access tokens
//! - [`RefreshTokenStore`]: rotating opaque refresh tokens
//! - [`SessionStore`]: sliding-window sessions
//! - [`PendingAuthStore`]: step-up tokens
//!
//! [`AuthService`] composes them into request-level flows.
//!
//! [`EphemeralStore`]: tessera_core::EphemeralStore

pub mod blacklist;
pub mod code;
pub mod crypto;
pub mod directory;
pub mod error;
pub mod jwt;
pub mod ledger;
pub mod pending;
mod record;
pub mod refresh;
pub mod service;
pub mod session;

pub use blacklist::RevocationRegistry;
pub use code::{SignedCodeCodec, VerifiedCode};
pub use directory::{
    AccountDirectory, EntitlementReceipt, EntitlementSink, Grant, InMemoryAccounts,
    InMemoryEntitlements,
};
pub use error::{AuthError, AuthResult, TokenRejection};
pub use jwt::{Claims, IssuedToken, TokenIssuer, TokenSubject, TokenValidator};
pub use ledger::{LedgerPolicy, RedemptionLedger, Reservation};
pub use pending::PendingAuthStore;
pub use refresh::{RefreshGrant, RefreshTokenRecord, RefreshTokenStore};
pub use service::{AuthService, ClientContext, LogoutSummary, TokenPair};
pub use session::{NewSession, Session, SessionStore};
