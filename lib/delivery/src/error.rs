//! Error types for message delivery.

use crate::connection::ProviderKind;
use std::fmt;

/// Errors from provider clients and the fallback dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The connection lacks the endpoint or credential the provider needs.
    NotConfigured {
        provider: ProviderKind,
        reason: String,
    },
    /// A single attempt exceeded its deadline; the in-flight request was
    /// cancelled.
    Timeout { provider: ProviderKind },
    /// The provider rejected the request or returned a malformed payload.
    Provider {
        provider: ProviderKind,
        detail: String,
    },
    /// The primary and every fallback candidate failed.
    ///
    /// Diagnostic priority goes to the originally intended connection, so
    /// the message carries the primary's failure detail.
    AllProvidersFailed {
        primary: ProviderKind,
        primary_detail: String,
        attempts: usize,
    },
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConfigured { provider, reason } => {
                write!(f, "{provider} provider not configured: {reason}")
            }
            Self::Timeout { provider } => {
                write!(f, "{provider} provider timed out")
            }
            Self::Provider { provider, detail } => {
                write!(f, "{provider} provider failed: {detail}")
            }
            Self::AllProvidersFailed {
                primary,
                primary_detail,
                attempts,
            } => {
                write!(
                    f,
                    "all {attempts} provider attempts failed; primary ({primary}): {primary_detail}"
                )
            }
        }
    }
}

impl std::error::Error for DeliveryError {}
