//! Account and camera descriptors.
//!
//! These are the narrow data contract with the out-of-scope account REST
//! API: plain, immutable value types the caller constructs from whatever
//! collaborator it uses to authenticate with the cloud backend. Nothing in
//! this module talks to the network.

/// An authenticated cloud-account identity, as needed to derive the
/// authentication challenge response.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Account {
    pub phone_id: String,
    pub open_user_id: String,
    /// Display-only; not used by connect/auth.
    #[serde(default)]
    pub nickname: Option<String>,
    /// Display-only; not used by connect/auth.
    #[serde(default)]
    pub timezone_name: Option<String>,
}

/// Error constructing a [`Camera`] from malformed descriptor fields.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CameraDescriptorError {
    #[error("camera uid must be 1-20 ASCII characters, got {0} bytes")]
    InvalidUid(usize),
    #[error("camera enr must be exactly 16 characters, got {0}")]
    InvalidEnr(usize),
    #[error("camera mac must be exactly 12 hex characters, got {0}")]
    InvalidMac(usize),
}

/// Identifies one camera and carries the fields the transport/auth layers
/// need to connect and authenticate.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Camera {
    pub uid: String,
    pub enr: String,
    pub mac: String,
    /// Opaque tag from the account API; the core never interprets it,
    /// only logs it.
    pub p2p_type: i32,
    pub ip: String,
    pub product_model: String,
    pub nickname: String,
    pub timezone_name: Option<String>,
}

impl Camera {
    pub fn new(
        uid: impl Into<String>,
        enr: impl Into<String>,
        mac: impl Into<String>,
        p2p_type: i32,
        ip: impl Into<String>,
        product_model: impl Into<String>,
        nickname: impl Into<String>,
    ) -> Result<Self, CameraDescriptorError> {
        let uid = uid.into();
        let enr = enr.into();
        let mac = mac.into();

        if uid.is_empty() || uid.len() > 20 || !uid.is_ascii() {
            return Err(CameraDescriptorError::InvalidUid(uid.len()));
        }
        if enr.len() != 16 {
            return Err(CameraDescriptorError::InvalidEnr(enr.len()));
        }
        if mac.len() != 12 || !mac.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CameraDescriptorError::InvalidMac(mac.len()));
        }

        Ok(Self {
            uid,
            enr,
            mac,
            p2p_type,
            ip: ip.into(),
            product_model: product_model.into(),
            nickname: nickname.into(),
            timezone_name: None,
        })
    }

    /// The doorbell product line uses a different pair of IOCtrl codes for
    /// the "resolving bit" step of authentication.
    pub fn is_doorbell(&self) -> bool {
        self.product_model == "WYZEDB3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_enr() {
        let err = Camera::new("uid1", "short", "001122334455", 0, "1.2.3.4", "WYZEC1", "cam")
            .unwrap_err();
        assert_eq!(err, CameraDescriptorError::InvalidEnr(5));
    }

    #[test]
    fn rejects_oversized_uid() {
        let long_uid = "a".repeat(21);
        let err = Camera::new(
            long_uid,
            "0123456789abcdef",
            "001122334455",
            0,
            "1.2.3.4",
            "WYZEC1",
            "cam",
        )
        .unwrap_err();
        assert!(matches!(err, CameraDescriptorError::InvalidUid(21)));
    }

    #[test]
    fn doorbell_detection() {
        let cam = Camera::new(
            "uid1",
            "0123456789abcdef",
            "001122334455",
            0,
            "1.2.3.4",
            "WYZEDB3",
            "doorbell",
        )
        .unwrap();
        assert!(cam.is_doorbell());
    }
}
