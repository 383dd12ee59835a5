// Per-transaction message tables keyed by SparkId
//
// The key columns are plain fields so the rows map one-to-one onto both
// the tables and header-based CSV files.
//
// Falcon in/out carry the raw fraud-score request and answer, the response
// table the decoded score and reasons, the solicitation table the inbound
// request envelope.

use super::audit::SparkId;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Which Falcon message table a record lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FalconDirection {
    In,
    Out,
}

impl FalconDirection {
    pub fn table(&self) -> &'static str {
        match self {
            FalconDirection::In => "spk_audit_falcon_in",
            FalconDirection::Out => "spk_audit_falcon_out",
        }
    }
}

/// Raw Falcon payload (tables `spk_audit_falcon_in` / `spk_audit_falcon_out`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FalconMessage {
    pub transaction_datetime: NaiveDateTime,
    pub system: String,
    pub token: String,
    pub timezone: Option<String>,
    pub message: Option<String>,
}

impl FalconMessage {
    pub fn new(id: SparkId, timezone: Option<&str>, message: Option<&str>) -> Self {
        FalconMessage {
            transaction_datetime: id.transaction_datetime,
            system: id.system,
            token: id.token,
            timezone: timezone.map(str::to_string),
            message: message.map(str::to_string),
        }
    }

    pub fn id(&self) -> SparkId {
        SparkId::new(self.transaction_datetime, &self.system, &self.token)
    }
}

/// Decoded Falcon answer (table `spk_audit_response`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub transaction_datetime: NaiveDateTime,
    pub system: String,
    pub token: String,
    pub return_code: Option<i32>,
    pub reason_code: Option<i32>,
    pub score: Option<i32>,
    pub score_adapt: Option<i32>,
    pub score_reason1: Option<String>,
    pub score_reason2: Option<String>,
    pub score_reason3: Option<String>,
    pub score_adapt_r1: Option<String>,
    pub score_adapt_r2: Option<String>,
    pub score_adapt_r3: Option<String>,
    pub decline_reason: Option<String>,
    pub user_data1: Option<String>,
    pub user_data2: Option<String>,
    pub user_data3: Option<String>,
    pub user_data4: Option<String>,
    pub user_data5: Option<String>,
}

impl Response {
    pub fn new(id: SparkId) -> Self {
        Response {
            transaction_datetime: id.transaction_datetime,
            system: id.system,
            token: id.token,
            return_code: None,
            reason_code: None,
            score: None,
            score_adapt: None,
            score_reason1: None,
            score_reason2: None,
            score_reason3: None,
            score_adapt_r1: None,
            score_adapt_r2: None,
            score_adapt_r3: None,
            decline_reason: None,
            user_data1: None,
            user_data2: None,
            user_data3: None,
            user_data4: None,
            user_data5: None,
        }
    }

    pub fn id(&self) -> SparkId {
        SparkId::new(self.transaction_datetime, &self.system, &self.token)
    }
}

/// Inbound request envelope (table `spk_audit_solicitation`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solicitation {
    pub transaction_datetime: NaiveDateTime,
    pub system: String,
    pub token: String,
    pub message_length: Option<i32>,
    pub exthdr_length: Option<i32>,
    pub message_type: Option<String>,
    pub app_token: Option<String>,
    pub init_time: Option<String>,
    pub send_time: Option<String>,
    pub wait: Option<String>,
    pub wait_interval: Option<i32>,
    pub response: Option<String>,
    pub source_ip: Option<String>,
    pub source_ip_response: Option<String>,
    pub source: Option<String>,
    pub destination: Option<String>,
}

impl Solicitation {
    pub fn new(id: SparkId) -> Self {
        Solicitation {
            transaction_datetime: id.transaction_datetime,
            system: id.system,
            token: id.token,
            message_length: None,
            exthdr_length: None,
            message_type: None,
            app_token: None,
            init_time: None,
            send_time: None,
            wait: None,
            wait_interval: None,
            response: None,
            source_ip: None,
            source_ip_response: None,
            source: None,
            destination: None,
        }
    }

    pub fn id(&self) -> SparkId {
        SparkId::new(self.transaction_datetime, &self.system, &self.token)
    }
}
