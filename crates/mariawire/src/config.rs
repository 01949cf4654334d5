//! Packet engine configuration.
//!
//! Provides the per-connection settings the framing and encoding layers
//! consume: packet size ceiling, collation, timezone handling for binary
//! dates, and an optional diagnostics observer.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, Offset, Utc};
use mariawire_core::error::ConfigError;
use mariawire_core::{Error, Result};

use crate::charset::{Charset, collation};

/// How binary temporal values are converted between instants and wall-clock
/// fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timezone {
    /// Use the host's local timezone
    #[default]
    Local,
    /// Use an explicit offset from UTC
    Offset(FixedOffset),
}

impl Timezone {
    /// The `+00:00` offset.
    pub fn utc() -> Self {
        Timezone::Offset(Utc.fix())
    }

    /// Wall-clock fields for an instant.
    pub fn naive_local(&self, instant: &DateTime<Utc>) -> NaiveDateTime {
        match self {
            Timezone::Local => instant.with_timezone(&Local).naive_local(),
            Timezone::Offset(offset) => instant.with_timezone(offset).naive_local(),
        }
    }
}

/// Lossy-but-legal events the engine resolves locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// An unpaired UTF-16 surrogate was replaced with `?`.
    UnpairedSurrogate {
        /// Index of the offending code unit
        position: usize,
    },
    /// A bulk row's type signature differed from the open sub-batch header,
    /// forcing a new sub-batch.
    BulkSignatureChanged {
        row: usize,
        previous: Vec<u8>,
        next: Vec<u8>,
    },
    /// A packet is being sent that exceeds `max_allowed_packet`; the server
    /// will most likely reset the connection.
    PacketAboveMaxAllowed { size: usize, max_allowed: u32 },
}

/// Observer invoked for every [`Diagnostic`].
#[derive(Clone)]
pub struct DiagnosticHook(Arc<dyn Fn(&Diagnostic) + Send + Sync>);

impl DiagnosticHook {
    pub fn new(hook: impl Fn(&Diagnostic) + Send + Sync + 'static) -> Self {
        Self(Arc::new(hook))
    }
}

impl fmt::Debug for DiagnosticHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DiagnosticHook(..)")
    }
}

/// Packet engine configuration.
#[derive(Debug, Clone)]
pub struct WireConfig {
    /// Server packet ceiling (default: 4MB)
    pub max_allowed_packet: u32,
    /// Connection collation id (default: utf8mb4_unicode_ci)
    pub collation: u16,
    /// Timezone used for binary date encoding
    pub timezone: Timezone,
    /// Whether the server sends extended type metadata (geometry type names)
    pub extended_metadata: bool,
    /// Trace a hex dump of every frame sent and packet received
    pub log_packets: bool,
    /// Optional observer for lossy fallbacks
    pub diagnostics: Option<DiagnosticHook>,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            max_allowed_packet: 4 * 1024 * 1024, // 4MB
            collation: collation::UTF8MB4_UNICODE_CI,
            timezone: Timezone::default(),
            extended_metadata: false,
            log_packets: false,
            diagnostics: None,
        }
    }
}

impl WireConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the max allowed packet size.
    pub fn max_allowed_packet(mut self, size: u32) -> Self {
        self.max_allowed_packet = size;
        self
    }

    /// Set the collation id.
    pub fn collation(mut self, collation: u16) -> Self {
        self.collation = collation;
        self
    }

    /// Set the timezone for binary dates.
    pub fn timezone(mut self, timezone: Timezone) -> Self {
        self.timezone = timezone;
        self
    }

    /// Enable or disable extended type metadata.
    pub fn extended_metadata(mut self, enabled: bool) -> Self {
        self.extended_metadata = enabled;
        self
    }

    /// Enable or disable packet hex dumps.
    pub fn log_packets(mut self, enabled: bool) -> Self {
        self.log_packets = enabled;
        self
    }

    /// Install a diagnostics observer.
    pub fn diagnostics(mut self, hook: impl Fn(&Diagnostic) + Send + Sync + 'static) -> Self {
        self.diagnostics = Some(DiagnosticHook::new(hook));
        self
    }

    /// Charset strategy selected by the configured collation.
    pub fn charset(&self) -> Charset {
        Charset::from_collation(self.collation)
    }

    /// Reject settings the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.max_allowed_packet == 0 {
            return Err(Error::Config(ConfigError {
                message: "max_allowed_packet must be greater than zero".to_string(),
                source: None,
            }));
        }
        Ok(())
    }

    /// Log a diagnostic and hand it to the observer, if any.
    pub(crate) fn report(&self, diagnostic: Diagnostic) {
        match &diagnostic {
            Diagnostic::UnpairedSurrogate { position } => {
                tracing::debug!(position, "unpaired surrogate replaced with '?'");
            }
            Diagnostic::BulkSignatureChanged { row, .. } => {
                tracing::debug!(row, "bulk type signature changed, starting new sub-batch");
            }
            Diagnostic::PacketAboveMaxAllowed { size, max_allowed } => {
                tracing::warn!(
                    size,
                    max_allowed,
                    "sending a packet larger than max_allowed_packet; the server will reset the connection"
                );
            }
        }
        if let Some(hook) = &self.diagnostics {
            (hook.0)(&diagnostic);
        }
    }
}
