//! Device types the connector can try.
//!
//! A device type pairs a prompt template with an SSH security profile. Trying
//! several types per credential set covers fleets where some appliances only
//! speak legacy SSH algorithms.

use std::fmt;
use std::str::FromStr;

use crate::error::ConnectError;
use crate::session::{ConnectionSecurityOptions, Input, PromptHandler};

/// Built-in device type names.
pub const BUILTIN_DEVICE_TYPES: &[&str] = &["cisco_asa", "cisco_asa_balanced", "cisco_asa_legacy"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    CiscoAsa,
    CiscoAsaBalanced,
    CiscoAsaLegacy,
}

impl DeviceType {
    pub fn name(&self) -> &'static str {
        match self {
            DeviceType::CiscoAsa => "cisco_asa",
            DeviceType::CiscoAsaBalanced => "cisco_asa_balanced",
            DeviceType::CiscoAsaLegacy => "cisco_asa_legacy",
        }
    }

    /// Prompt template for the device's shell.
    pub fn handler(&self) -> Result<PromptHandler, ConnectError> {
        cisco_asa()
    }

    pub fn security(&self) -> ConnectionSecurityOptions {
        match self {
            DeviceType::CiscoAsa => ConnectionSecurityOptions::secure_default(),
            DeviceType::CiscoAsaBalanced => ConnectionSecurityOptions::balanced(),
            DeviceType::CiscoAsaLegacy => ConnectionSecurityOptions::legacy_compatible(),
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DeviceType {
    type Err = ConnectError;

    /// Case-insensitive lookup of a built-in device type.
    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.to_ascii_lowercase().as_str() {
            "cisco_asa" | "asa" => Ok(DeviceType::CiscoAsa),
            "cisco_asa_balanced" => Ok(DeviceType::CiscoAsaBalanced),
            "cisco_asa_legacy" => Ok(DeviceType::CiscoAsaLegacy),
            _ => Err(ConnectError::TemplateNotFound(name.to_string())),
        }
    }
}

/// Returns a `PromptHandler` configured for Cisco ASA shells.
pub fn cisco_asa() -> Result<PromptHandler, ConnectError> {
    PromptHandler::new(
        // Prompt
        vec![
            ("Config".to_string(), vec![r"^[^\s#]+\(config[^)]*\)#\s*$"]),
            ("Enable".to_string(), vec![r"^[^\s#(]+#\s*$"]),
            ("Login".to_string(), vec![r"^[^\s>]+>\s*$"]),
        ],
        // Write (interactive inputs)
        vec![
            (
                "EnablePassword".to_string(),
                Input::param("EnablePassword"),
                vec![r"^\x00*\r?Password:\s*$"],
            ),
            (
                "ReloadConfirm".to_string(),
                Input::literal("\n"),
                vec![r"Proceed with reload\?\s*\[confirm\]"],
            ),
            (
                "SaveBeforeReload".to_string(),
                Input::literal("N\n"),
                vec![r"Save\? \[Y\]es/\[N\]o:"],
            ),
        ],
        // More regex
        vec![r"<--- More --->"],
        // Error regex
        vec![
            r"^ERROR: .+",
            r"^%.+",
            r"Invalid password",
            r"Access denied\.?",
            r"^Command authorization failed.*",
        ],
        // Edges
        vec![
            ("Login".to_string(), "enable".to_string(), "Enable".to_string()),
            (
                "Enable".to_string(),
                "configure terminal".to_string(),
                "Config".to_string(),
            ),
            ("Config".to_string(), "end".to_string(), "Enable".to_string()),
            ("Enable".to_string(), "disable".to_string(), "Login".to_string()),
        ],
    )
}
