//! User-facing identity data: human handles, device labels, profiles.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::{DeviceID, UserID};

/// Permission tier of a user inside its organization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserProfile {
    /// May author user and device certificates, update profiles, revoke.
    #[serde(rename = "ADMIN")]
    Admin,
    /// Regular member, may create realms and invite devices.
    #[serde(rename = "STANDARD")]
    Standard,
    /// Sees only redacted certificates, cannot own or manage realms.
    #[serde(rename = "OUTSIDER")]
    Outsider,
}

/// Email address plus display label, e.g. `John <john@example.com>`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HumanHandle {
    email: String,
    label: String,
}

/// Raised when an email or label fails validation.
#[derive(Debug, thiserror::Error)]
#[error("invalid human handle")]
pub struct InvalidHumanHandle;

impl HumanHandle {
    pub const MAX_EMAIL_LEN: usize = 255;
    pub const MAX_LABEL_LEN: usize = 255;

    pub fn new(email: &str, label: &str) -> Result<Self, InvalidHumanHandle> {
        if email.is_empty()
            || email.len() > Self::MAX_EMAIL_LEN
            || !email.contains('@')
            || email.chars().any(|c| c.is_control() || c.is_whitespace())
        {
            return Err(InvalidHumanHandle);
        }
        if label.is_empty()
            || label.len() > Self::MAX_LABEL_LEN
            || label.chars().any(|c| c.is_control())
        {
            return Err(InvalidHumanHandle);
        }
        Ok(Self {
            email: email.to_string(),
            label: label.to_string(),
        })
    }

    /// Placeholder handle stored in redacted certificates. Deterministic
    /// from the user id so that redacted twins compare equal.
    pub fn new_redacted(user_id: UserID) -> Self {
        let hex = user_id.hex();
        Self {
            email: format!("{hex}@redacted.invalid"),
            label: hex,
        }
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for HumanHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HumanHandle({self})")
    }
}

impl fmt::Display for HumanHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.label, self.email)
    }
}

/// Human-chosen device name, e.g. `My Laptop`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceLabel(String);

/// Raised when a raw string does not form a valid `DeviceLabel`.
#[derive(Debug, thiserror::Error)]
#[error("invalid device label")]
pub struct InvalidDeviceLabel;

impl DeviceLabel {
    pub const MAX_LEN: usize = 255;

    /// Placeholder label stored in redacted certificates.
    pub fn new_redacted(device_id: DeviceID) -> Self {
        Self(device_id.hex())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DeviceLabel {
    type Error = InvalidDeviceLabel;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        if raw.is_empty() || raw.len() > Self::MAX_LEN || raw.chars().any(|c| c.is_control()) {
            return Err(InvalidDeviceLabel);
        }
        Ok(Self(raw))
    }
}

impl TryFrom<&str> for DeviceLabel {
    type Error = InvalidDeviceLabel;

    fn try_from(raw: &str) -> Result<Self, Self::Error> {
        Self::try_from(raw.to_string())
    }
}

impl From<DeviceLabel> for String {
    fn from(label: DeviceLabel) -> Self {
        label.0
    }
}

impl fmt::Debug for DeviceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceLabel({})", self.0)
    }
}

impl fmt::Display for DeviceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A field that exists in a real and a redacted flavor.
///
/// The OUTSIDER profile only ever sees the redacted flavor; both flavors
/// carry a value so that code reading the field never has to branch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MaybeRedacted<T> {
    Real(T),
    Redacted(T),
}

impl<T> MaybeRedacted<T> {
    pub fn is_redacted(&self) -> bool {
        matches!(self, Self::Redacted(_))
    }
}

impl<T> AsRef<T> for MaybeRedacted<T> {
    fn as_ref(&self) -> &T {
        match self {
            Self::Real(v) | Self::Redacted(v) => v,
        }
    }
}
