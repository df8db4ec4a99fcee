//! LoRaWAN OTAA credentials.
//!
//! EUIs are 16 hex characters, keys are 32. Key material is wiped from
//! memory when the credentials are dropped.

use super::ConfigError;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of an AppKey/NwkKey in bytes.
pub const KEY_LEN: usize = 16;

/// Hex characters in a key.
pub const KEY_HEX_LEN: usize = KEY_LEN * 2;

/// Hex characters in a JoinEUI/DevEUI.
pub const EUI_HEX_LEN: usize = 16;

/// OTAA credentials used by the radio link to join.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    join_eui: u64,
    dev_eui: u64,
    app_key: [u8; KEY_LEN],
    nwk_key: [u8; KEY_LEN],
}

impl Credentials {
    /// Build credentials from raw values.
    pub fn new(join_eui: u64, dev_eui: u64, app_key: [u8; KEY_LEN], nwk_key: [u8; KEY_LEN]) -> Self {
        Self {
            join_eui,
            dev_eui,
            app_key,
            nwk_key,
        }
    }

    /// Parse credentials from hex strings.
    ///
    /// Surrounding whitespace is ignored. Upper and lower case are accepted.
    pub fn from_hex(
        join_eui: &str,
        dev_eui: &str,
        app_key: &str,
        nwk_key: &str,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            join_eui: parse_eui("join_eui", join_eui)?,
            dev_eui: parse_eui("dev_eui", dev_eui)?,
            app_key: parse_key("app_key", app_key)?,
            nwk_key: parse_key("nwk_key", nwk_key)?,
        })
    }

    /// Credentials baked in at compile time.
    ///
    /// Reads `LORA_JOIN_EUI`, `LORA_DEV_EUI`, `LORA_APP_KEY` and
    /// `LORA_NWK_KEY`. A missing variable yields a length error, which
    /// the radio link reports on every join attempt.
    pub fn from_build_env() -> Result<Self, ConfigError> {
        Self::from_hex(
            option_env!("LORA_JOIN_EUI").unwrap_or(""),
            option_env!("LORA_DEV_EUI").unwrap_or(""),
            option_env!("LORA_APP_KEY").unwrap_or(""),
            option_env!("LORA_NWK_KEY").unwrap_or(""),
        )
    }

    pub fn join_eui(&self) -> u64 {
        self.join_eui
    }

    pub fn dev_eui(&self) -> u64 {
        self.dev_eui
    }

    pub fn app_key(&self) -> &[u8; KEY_LEN] {
        &self.app_key
    }

    pub fn nwk_key(&self) -> &[u8; KEY_LEN] {
        &self.nwk_key
    }

    /// DevEUI formatted as 16 upper-case hex characters.
    pub fn dev_eui_hex(&self) -> String {
        format!("{:016X}", self.dev_eui)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("join_eui", &format_args!("{:016X}", self.join_eui))
            .field("dev_eui", &format_args!("{:016X}", self.dev_eui))
            .field("app_key", &"<redacted>")
            .field("nwk_key", &"<redacted>")
            .finish()
    }
}

fn parse_eui(field: &'static str, text: &str) -> Result<u64, ConfigError> {
    let text = text.trim();
    if text.len() != EUI_HEX_LEN {
        return Err(ConfigError::InvalidLength {
            field,
            expected: EUI_HEX_LEN,
            actual: text.len(),
        });
    }
    let mut bytes = [0u8; 8];
    hex::decode_to_slice(text, &mut bytes).map_err(|_| ConfigError::InvalidHex { field })?;
    Ok(u64::from_be_bytes(bytes))
}

fn parse_key(field: &'static str, text: &str) -> Result<[u8; KEY_LEN], ConfigError> {
    let text = text.trim();
    if text.len() != KEY_HEX_LEN {
        return Err(ConfigError::InvalidLength {
            field,
            expected: KEY_HEX_LEN,
            actual: text.len(),
        });
    }
    let mut key = [0u8; KEY_LEN];
    hex::decode_to_slice(text, &mut key).map_err(|_| ConfigError::InvalidHex { field })?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EUI: &str = "70B3D57ED8004069";
    const KEY: &str = "0EF9A3826DD27B1F46D82048EE598998";

    #[test]
    fn test_parse_valid() {
        let creds = Credentials::from_hex(EUI, EUI, KEY, KEY).unwrap();
        assert_eq!(creds.join_eui(), 0x70B3_D57E_D800_4069);
        assert_eq!(creds.dev_eui(), 0x70B3_D57E_D800_4069);
        assert_eq!(creds.app_key()[0], 0x0E);
        assert_eq!(creds.app_key()[15], 0x98);
        assert_eq!(creds.nwk_key(), creds.app_key());
        assert_eq!(creds.dev_eui_hex(), EUI);
    }

    #[test]
    fn test_parse_lowercase_and_whitespace() {
        let creds = Credentials::from_hex(
            " 70b3d57ed8004069 ",
            EUI,
            &KEY.to_lowercase(),
            KEY,
        )
        .unwrap();
        assert_eq!(creds.join_eui(), 0x70B3_D57E_D800_4069);
        assert_eq!(creds.app_key(), creds.nwk_key());
    }

    #[test]
    fn test_wrong_eui_length() {
        let err = Credentials::from_hex("70B3D57E", EUI, KEY, KEY).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidLength {
                field: "join_eui",
                expected: 16,
                actual: 8
            }
        );
    }

    #[test]
    fn test_wrong_key_length() {
        let err = Credentials::from_hex(EUI, EUI, KEY, &KEY[..30]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidLength {
                field: "nwk_key",
                ..
            }
        ));
    }

    #[test]
    fn test_non_hex_rejected() {
        let err = Credentials::from_hex(EUI, "70B3D57ED80040ZZ", KEY, KEY).unwrap_err();
        assert_eq!(err, ConfigError::InvalidHex { field: "dev_eui" });
    }

    #[test]
    fn test_debug_redacts_keys() {
        let creds = Credentials::from_hex(EUI, EUI, KEY, KEY).unwrap();
        let debug = format!("{:?}", creds);
        assert!(debug.contains("70B3D57ED8004069"));
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("0EF9A382"));
    }

    #[test]
    fn test_zeroize_clears_keys() {
        let mut creds = Credentials::from_hex(EUI, EUI, KEY, KEY).unwrap();
        creds.zeroize();
        assert_eq!(creds.app_key(), &[0u8; KEY_LEN]);
        assert_eq!(creds.dev_eui(), 0);
    }
}
