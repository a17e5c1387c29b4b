//! Historical event search envelopes.
//!
//! Both search variants page through results with `searchResultPosition`
//! and `maxResults`, reusing the `searchID` the device hands out. The XML
//! variant filters by category alone; the JSON variant requires one minor
//! code per request.
//!
//! ```text
//! <AcsEventCond version="2.0" xmlns="http://www.isapi.org/ver20/XMLSchema">
//!   <searchID>..</searchID>
//!   <searchResultPosition>0</searchResultPosition>
//!   <maxResults>100</maxResults>
//!   <major>5</major>
//!   <minor>75</minor>                                   optional
//!   <StartTime>2024-05-01T00:00:00+05:00</StartTime>    optional
//!   <EndTime>2024-05-02T00:00:00+05:00</EndTime>        optional
//! </AcsEventCond>
//!
//! {"AcsEventCond": {"searchID": "..", "searchResultPosition": 0,
//!   "maxResults": 100, "major": 5, "minor": 75,
//!   "startTime": "..", "endTime": ".."}}
//! ```

use crate::error::{ProtocolError, Result};
use crate::raw::RawDeviceEvent;
use crate::xml::{XmlElement, escape};
use acsync_core::constants::{ISAPI_XML_NAMESPACE, MAJOR_ACCESS_CONTROL, SEARCH_STATUS_MORE};
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inclusive time range of a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    #[must_use]
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    fn format_bound(ts: DateTime<Utc>, offset: FixedOffset) -> String {
        ts.with_timezone(&offset)
            .format("%Y-%m-%dT%H:%M:%S%:z")
            .to_string()
    }
}

/// One page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub search_id: String,
    pub position: u32,
    pub max_results: u32,
    pub minor: Option<i64>,
    pub window: Option<TimeWindow>,
    /// Offset the device expects time bounds in.
    pub utc_offset: FixedOffset,
}

#[derive(Serialize)]
struct JsonSearchEnvelope<'a> {
    #[serde(rename = "AcsEventCond")]
    cond: JsonSearchCond<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonSearchCond<'a> {
    #[serde(rename = "searchID")]
    search_id: &'a str,
    search_result_position: u32,
    max_results: u32,
    major: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    minor: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_time: Option<String>,
}

impl SearchRequest {
    fn bounds(&self) -> Option<(String, String)> {
        self.window.map(|w| {
            (
                TimeWindow::format_bound(w.start, self.utc_offset),
                TimeWindow::format_bound(w.end, self.utc_offset),
            )
        })
    }

    /// Render the XML envelope.
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut body = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <AcsEventCond version=\"2.0\" xmlns=\"{ISAPI_XML_NAMESPACE}\">\n\
             <searchID>{}</searchID>\n\
             <searchResultPosition>{}</searchResultPosition>\n\
             <maxResults>{}</maxResults>\n\
             <major>{MAJOR_ACCESS_CONTROL}</major>\n",
            escape(&self.search_id),
            self.position,
            self.max_results,
        );
        if let Some(minor) = self.minor {
            body.push_str(&format!("<minor>{minor}</minor>\n"));
        }
        if let Some((start, end)) = self.bounds() {
            body.push_str(&format!(
                "<StartTime>{}</StartTime>\n<EndTime>{}</EndTime>\n",
                escape(&start),
                escape(&end)
            ));
        }
        body.push_str("</AcsEventCond>");
        body
    }

    /// Render the JSON envelope.
    ///
    /// # Errors
    /// Returns `ProtocolError::Json` if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        let (start_time, end_time) = self.bounds().unzip();
        let envelope = JsonSearchEnvelope {
            cond: JsonSearchCond {
                search_id: &self.search_id,
                search_result_position: self.position,
                max_results: self.max_results,
                major: MAJOR_ACCESS_CONTROL,
                minor: self.minor,
                start_time,
                end_time,
            },
        };
        Ok(serde_json::to_vec(&envelope)?)
    }
}

/// One page of search results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPage {
    pub search_id: Option<String>,
    pub events: Vec<RawDeviceEvent>,
    pub has_more: bool,
    pub total_matches: Option<u64>,
}

#[derive(Deserialize)]
struct JsonSearchResponse {
    #[serde(rename = "AcsEvent")]
    acs_event: JsonSearchResult,
}

#[derive(Deserialize)]
struct JsonSearchResult {
    #[serde(rename = "searchID", default)]
    search_id: Option<String>,
    #[serde(rename = "responseStatusStrg", default)]
    status: Option<String>,
    #[serde(rename = "totalMatches", default)]
    total_matches: Option<u64>,
    #[serde(rename = "InfoList", default)]
    info_list: Vec<Value>,
}

impl SearchPage {
    /// Decode a JSON search response.
    ///
    /// # Errors
    /// Returns `ProtocolError::Json` if the body is not a search response.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        let response: JsonSearchResponse = serde_json::from_slice(body)?;
        let result = response.acs_event;
        Ok(Self {
            search_id: result.search_id,
            has_more: result.status.as_deref() == Some(SEARCH_STATUS_MORE),
            total_matches: result.total_matches,
            events: result
                .info_list
                .into_iter()
                .filter_map(RawDeviceEvent::from_json)
                .collect(),
        })
    }

    /// Decode an XML search response.
    ///
    /// Records are the `Info` children of `InfoList`; older firmware lists
    /// bare `AcsEvent` elements carrying a `serialNo` instead.
    ///
    /// # Errors
    /// Returns `ProtocolError::Xml` for malformed documents and
    /// `UnexpectedShape` when the document is a status reply instead.
    pub fn from_xml(body: &str) -> Result<Self> {
        let root = XmlElement::parse(body)?;
        if root.name == "ResponseStatus" {
            return Err(ProtocolError::UnexpectedShape(format!(
                "search rejected: {}",
                root.child_text("statusString").unwrap_or("unknown status")
            )));
        }

        let mut records: Vec<&XmlElement> = root
            .find_all("InfoList")
            .into_iter()
            .flat_map(|list| list.children.iter())
            .collect();
        if records.is_empty() {
            records = root
                .find_all("AcsEvent")
                .into_iter()
                .filter(|e| e.child("serialNo").is_some())
                .collect();
        }

        Ok(Self {
            search_id: root.find_text("searchID").map(str::to_string),
            has_more: root.find_text("responseStatusStrg") == Some(SEARCH_STATUS_MORE),
            total_matches: root.find_text("totalMatches").and_then(|t| t.parse().ok()),
            events: records.into_iter().map(RawDeviceEvent::from_xml).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn request(minor: Option<i64>, window: bool) -> SearchRequest {
        SearchRequest {
            search_id: "sid-1".to_string(),
            position: 200,
            max_results: 100,
            minor,
            window: window.then(|| {
                TimeWindow::new(
                    Utc.with_ymd_and_hms(2024, 4, 30, 19, 0, 0).unwrap(),
                    Utc.with_ymd_and_hms(2024, 5, 1, 19, 0, 0).unwrap(),
                )
            }),
            utc_offset: FixedOffset::east_opt(5 * 3600).unwrap(),
        }
    }

    #[test]
    fn test_xml_envelope() {
        let xml = request(None, true).to_xml();
        assert!(xml.contains(r#"<AcsEventCond version="2.0" xmlns="http://www.isapi.org/ver20/XMLSchema">"#));
        assert!(xml.contains("<searchID>sid-1</searchID>"));
        assert!(xml.contains("<searchResultPosition>200</searchResultPosition>"));
        assert!(xml.contains("<maxResults>100</maxResults>"));
        assert!(xml.contains("<major>5</major>"));
        assert!(!xml.contains("<minor>"));
        assert!(xml.contains("<StartTime>2024-05-01T00:00:00+05:00</StartTime>"));
        assert!(xml.contains("<EndTime>2024-05-02T00:00:00+05:00</EndTime>"));

        // The envelope must be readable by the same parser the client uses.
        let parsed = XmlElement::parse(&xml).unwrap();
        assert_eq!(parsed.child_text("major"), Some("5"));
    }

    #[test]
    fn test_json_envelope() {
        let body = request(Some(76), false).to_json().unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        let cond = &value["AcsEventCond"];
        assert_eq!(cond["searchID"], "sid-1");
        assert_eq!(cond["searchResultPosition"], 200);
        assert_eq!(cond["maxResults"], 100);
        assert_eq!(cond["major"], 5);
        assert_eq!(cond["minor"], 76);
        assert!(cond.get("startTime").is_none());
    }

    #[test]
    fn test_json_page() {
        let body = br#"{"AcsEvent": {"searchID": "sid-1", "responseStatusStrg": "MORE",
            "numOfMatches": 2, "totalMatches": 350,
            "InfoList": [{"serialNo": 1, "major": 5, "minor": 75}, {"serialNo": 2, "major": 5, "minor": 75}]}}"#;
        let page = SearchPage::from_json(body).unwrap();
        assert!(page.has_more);
        assert_eq!(page.total_matches, Some(350));
        assert_eq!(page.events.len(), 2);
        assert_eq!(page.events[1].integer(&["serialNo"]), Some(2));
    }

    #[test]
    fn test_json_page_without_records() {
        let page = SearchPage::from_json(br#"{"AcsEvent": {"responseStatusStrg": "NO MATCH"}}"#).unwrap();
        assert!(!page.has_more);
        assert!(page.events.is_empty());
    }

    #[test]
    fn test_json_page_rejects_other_shapes() {
        assert!(SearchPage::from_json(br#"{"statusCode": 4}"#).is_err());
    }

    #[test]
    fn test_xml_page_with_info_list() {
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<AcsEvent version="2.0" xmlns="http://www.isapi.org/ver20/XMLSchema">
  <searchID>sid-1</searchID>
  <responseStatusStrg>OK</responseStatusStrg>
  <numOfMatches>1</numOfMatches>
  <totalMatches>1</totalMatches>
  <InfoList>
    <Info>
      <major>5</major><minor>75</minor>
      <time>2024-05-01T08:00:00+05:00</time>
      <serialNo>42</serialNo>
      <employeeNoString>7</employeeNoString>
    </Info>
  </InfoList>
</AcsEvent>"#;
        let page = SearchPage::from_xml(body).unwrap();
        assert!(!page.has_more);
        assert_eq!(page.total_matches, Some(1));
        assert_eq!(page.events.len(), 1);
        assert_eq!(page.events[0].text(&["employeeNoString"]), Some("7".to_string()));
    }

    #[test]
    fn test_xml_page_with_bare_events() {
        let body = r#"<AcsEventList>
  <responseStatusStrg>MORE</responseStatusStrg>
  <AcsEvent><serialNo>1</serialNo><major>5</major><minor>76</minor>
    <acsEventInfo><employeeNoString>9</employeeNoString></acsEventInfo></AcsEvent>
  <AcsEvent><serialNo>2</serialNo><major>5</major><minor>75</minor></AcsEvent>
</AcsEventList>"#;
        let page = SearchPage::from_xml(body).unwrap();
        assert!(page.has_more);
        assert_eq!(page.events.len(), 2);
        assert_eq!(page.events[0].text(&["employeeNoString"]), Some("9".to_string()));
    }

    #[test]
    fn test_xml_status_reply_is_an_error() {
        let body = "<ResponseStatus><statusCode>4</statusCode><statusString>Invalid Operation</statusString></ResponseStatus>";
        assert!(matches!(
            SearchPage::from_xml(body),
            Err(ProtocolError::UnexpectedShape(_))
        ));
    }
}
