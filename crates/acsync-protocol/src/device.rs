//! Device status bodies, identity and enrolled users.

use crate::error::{ProtocolError, Result};
use crate::xml::XmlElement;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Lockout assumed when a locked device omits the unlock time.
pub const DEFAULT_LOCKOUT: Duration = Duration::from_secs(30 * 60);

/// Meaning of a non-success response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceStatus {
    /// Account locked after repeated failed logins.
    Locked { remaining: Duration },
    /// Structured status reply.
    Status {
        status_string: Option<String>,
        sub_status_code: Option<String>,
    },
    /// Body not recognized.
    Unknown,
}

impl DeviceStatus {
    /// Decode an error body in XML or JSON form.
    #[must_use]
    pub fn parse(body: &str) -> Self {
        let trimmed = body.trim_start();
        if trimmed.starts_with('<') {
            XmlElement::parse(trimmed).map_or(DeviceStatus::Unknown, |root| Self::from_xml(&root))
        } else if trimmed.starts_with('{') {
            serde_json::from_str::<Value>(trimmed)
                .map_or(DeviceStatus::Unknown, |value| Self::from_json(&value))
        } else {
            DeviceStatus::Unknown
        }
    }

    fn from_xml(root: &XmlElement) -> Self {
        if let Some(check) = root.find("userCheck")
            && check.find_text("lockStatus") == Some("lock")
        {
            return DeviceStatus::Locked {
                remaining: unlock_time(check.find_text("unlockTime")),
            };
        }
        if let Some(status) = root.find("ResponseStatus") {
            return DeviceStatus::Status {
                status_string: status.find_text("statusString").map(str::to_string),
                sub_status_code: status.find_text("subStatusCode").map(str::to_string),
            };
        }
        DeviceStatus::Unknown
    }

    fn from_json(value: &Value) -> Self {
        let body = value
            .get("ResponseStatus")
            .or_else(|| value.get("userCheck"))
            .unwrap_or(value);
        let text = |key: &str| match body.get(key) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        if text("lockStatus").as_deref() == Some("lock") {
            return DeviceStatus::Locked {
                remaining: unlock_time(text("unlockTime").as_deref()),
            };
        }
        let status_string = text("statusString").or_else(|| text("errorMsg"));
        let sub_status_code = text("subStatusCode");
        if status_string.is_none() && sub_status_code.is_none() {
            return DeviceStatus::Unknown;
        }
        DeviceStatus::Status {
            status_string,
            sub_status_code,
        }
    }

    /// Human readable description, if the body carried one.
    #[must_use]
    pub fn describe(&self) -> Option<String> {
        match self {
            DeviceStatus::Locked { remaining } => {
                Some(format!("account locked for {}s", remaining.as_secs()))
            }
            DeviceStatus::Status {
                status_string,
                sub_status_code,
            } => match (status_string, sub_status_code) {
                (Some(s), Some(code)) => Some(format!("{s} ({code})")),
                (Some(s), None) => Some(s.clone()),
                (None, Some(code)) => Some(code.clone()),
                (None, None) => None,
            },
            DeviceStatus::Unknown => None,
        }
    }
}

fn unlock_time(text: Option<&str>) -> Duration {
    text.and_then(|t| t.trim().parse::<u64>().ok())
        .map_or(DEFAULT_LOCKOUT, Duration::from_secs)
}

/// Identity reported by `/ISAPI/System/deviceInfo`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub firmware_version: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
}

impl DeviceInfo {
    /// Decode the JSON or XML form.
    ///
    /// # Errors
    /// Returns `UnexpectedShape` when no `DeviceInfo` block is present.
    pub fn parse(body: &str) -> Result<Self> {
        let trimmed = body.trim_start();
        if trimmed.starts_with('<') {
            let root = XmlElement::parse(trimmed)?;
            let info = root
                .find("DeviceInfo")
                .ok_or_else(|| ProtocolError::UnexpectedShape("missing DeviceInfo".to_string()))?;
            let field = |name: &str| info.find_text(name).map(str::to_string);
            return Ok(Self {
                device_name: field("deviceName"),
                model: field("model"),
                firmware_version: field("firmwareVersion"),
                serial_number: field("serialNumber"),
            });
        }

        let value: Value = serde_json::from_str(trimmed)?;
        let info = value
            .get("DeviceInfo")
            .cloned()
            .ok_or_else(|| ProtocolError::UnexpectedShape("missing DeviceInfo".to_string()))?;
        Ok(serde_json::from_value(info)?)
    }
}

/// User search page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSearchRequest {
    pub search_id: String,
    pub position: u32,
    pub max_results: u32,
}

impl UserSearchRequest {
    /// Render the JSON envelope.
    ///
    /// # Errors
    /// Returns `ProtocolError::Json` if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        let envelope = serde_json::json!({
            "UserInfoSearchCond": {
                "searchID": self.search_id,
                "searchResultPosition": self.position,
                "maxResults": self.max_results,
            }
        });
        Ok(serde_json::to_vec(&envelope)?)
    }
}

/// Person enrolled on a terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceUser {
    #[serde(rename = "employeeNo")]
    pub employee_no: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// One page of enrolled users.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserPage {
    pub users: Vec<DeviceUser>,
    pub has_more: bool,
}

#[derive(Deserialize)]
struct UserSearchResponse {
    #[serde(rename = "UserInfoSearch")]
    search: UserSearchResult,
}

#[derive(Deserialize)]
struct UserSearchResult {
    #[serde(rename = "responseStatusStrg", default)]
    status: Option<String>,
    #[serde(rename = "UserInfo", default)]
    users: Vec<DeviceUser>,
}

impl UserPage {
    /// Decode a JSON user search response.
    ///
    /// # Errors
    /// Returns `ProtocolError::Json` if the body is not a user search response.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        let response: UserSearchResponse = serde_json::from_slice(body)?;
        Ok(Self {
            has_more: response.search.status.as_deref()
                == Some(acsync_core::constants::SEARCH_STATUS_MORE),
            users: response.search.users,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_xml_lockout_body() {
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<userCheck><statusValue>401</statusValue><statusString>Unauthorized</statusString>
<isDefaultPassword>false</isDefaultPassword><lockStatus>lock</lockStatus>
<unlockTime>1780</unlockTime><retryLoginTime>0</retryLoginTime></userCheck>"#;
        assert_eq!(
            DeviceStatus::parse(body),
            DeviceStatus::Locked {
                remaining: Duration::from_secs(1780)
            }
        );
    }

    #[test]
    fn test_lockout_without_unlock_time_uses_default() {
        let body = "<userCheck><lockStatus>lock</lockStatus></userCheck>";
        assert_eq!(
            DeviceStatus::parse(body),
            DeviceStatus::Locked {
                remaining: DEFAULT_LOCKOUT
            }
        );
    }

    #[test]
    fn test_unlocked_user_check_is_not_lockout() {
        let body = "<userCheck><lockStatus>unlock</lockStatus><retryLoginTime>4</retryLoginTime></userCheck>";
        assert_eq!(DeviceStatus::parse(body), DeviceStatus::Unknown);
    }

    #[rstest]
    #[case(
        "<ResponseStatus><statusCode>4</statusCode><statusString>Invalid Operation</statusString><subStatusCode>notSupport</subStatusCode></ResponseStatus>",
        Some("Invalid Operation (notSupport)")
    )]
    #[case(r#"{"statusCode": 4, "statusString": "Invalid Content", "subStatusCode": "badJsonContent"}"#, Some("Invalid Content (badJsonContent)"))]
    #[case(r#"{"ResponseStatus": {"statusString": "Device Busy"}}"#, Some("Device Busy"))]
    #[case("plain text", None)]
    fn test_status_description(#[case] body: &str, #[case] expected: Option<&str>) {
        assert_eq!(DeviceStatus::parse(body).describe().as_deref(), expected);
    }

    #[test]
    fn test_json_lockout() {
        let body = r#"{"userCheck": {"lockStatus": "lock", "unlockTime": 60}}"#;
        assert_eq!(
            DeviceStatus::parse(body),
            DeviceStatus::Locked {
                remaining: Duration::from_secs(60)
            }
        );
    }

    #[test]
    fn test_device_info_json() {
        let body = r#"{"DeviceInfo": {"deviceName": "Lobby", "model": "DS-K1T671", "firmwareVersion": "V3.2.30", "serialNumber": "DS-K1T67120210101"}}"#;
        let info = DeviceInfo::parse(body).unwrap();
        assert_eq!(info.device_name.as_deref(), Some("Lobby"));
        assert_eq!(info.firmware_version.as_deref(), Some("V3.2.30"));
    }

    #[test]
    fn test_device_info_xml() {
        let body = r#"<DeviceInfo version="2.0" xmlns="http://www.isapi.org/ver20/XMLSchema">
<deviceName>Gate</deviceName><model>DS-K1T341</model><serialNumber>SN1</serialNumber>
<firmwareVersion>V3.3.0</firmwareVersion></DeviceInfo>"#;
        let info = DeviceInfo::parse(body).unwrap();
        assert_eq!(info.model.as_deref(), Some("DS-K1T341"));
        assert_eq!(info.serial_number.as_deref(), Some("SN1"));
    }

    #[test]
    fn test_device_info_missing_block() {
        assert!(DeviceInfo::parse(r#"{"other": 1}"#).is_err());
    }

    #[test]
    fn test_user_page() {
        let body = br#"{"UserInfoSearch": {"searchID": "u1", "responseStatusStrg": "MORE",
            "numOfMatches": 2, "totalMatches": 5,
            "UserInfo": [{"employeeNo": "7", "name": "Ann Lee"}, {"employeeNo": "8"}]}}"#;
        let page = UserPage::from_json(body).unwrap();
        assert!(page.has_more);
        assert_eq!(page.users.len(), 2);
        assert_eq!(page.users[0].name.as_deref(), Some("Ann Lee"));
        assert!(page.users[1].name.is_none());
    }
}
