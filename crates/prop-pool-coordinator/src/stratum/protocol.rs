use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::shares::RoundTemplate;
use crate::types::{Address, BlockTemplate, RoundId, Transaction};

pub const METHOD_SUBSCRIBE: &str = "mining.subscribe";
pub const METHOD_AUTHORIZE: &str = "mining.authorize";
pub const METHOD_SUBMIT: &str = "mining.submit";
pub const METHOD_GET_STATUS: &str = "mining.get_status";
pub const METHOD_NOTIFY: &str = "mining.notify";
pub const METHOD_SUBMIT_TRANSACTION: &str = "pool.submit_transaction";

pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
pub const UNAUTHORIZED: i32 = 24;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StratumMessage {
    pub id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StratumError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StratumError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl StratumError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// Body of `mining.submit`. The worker address comes from the connection's
/// authorization, not from the message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitParams {
    pub round_id: RoundId,
    pub candidate: BlockTemplate,
}

#[derive(Debug, Clone)]
pub enum StratumRequest {
    Subscribe {
        id: u64,
        user_agent: Option<String>,
    },
    Authorize {
        id: u64,
        address: Address,
    },
    Submit {
        id: u64,
        params: SubmitParams,
    },
    GetStatus {
        id: u64,
    },
    SubmitTransaction {
        id: u64,
        tx: Transaction,
    },
}

#[derive(Debug, Clone)]
pub enum StratumResponse {
    Result { id: u64, result: Value },
    Error { id: u64, error: StratumError },
    Notification { method: String, params: Value },
}

fn params_from<T: serde::de::DeserializeOwned>(params: Option<&Value>) -> Result<T, StratumError> {
    let params = params.ok_or_else(|| StratumError::new(INVALID_PARAMS, "missing params"))?;
    serde_json::from_value(params.clone())
        .map_err(|e| StratumError::new(INVALID_PARAMS, format!("invalid params: {}", e)))
}

impl StratumMessage {
    pub fn request(id: u64, method: &str, params: Value) -> Self {
        Self {
            id: Some(id),
            method: Some(method.to_string()),
            params: Some(params),
            result: None,
            error: None,
        }
    }

    pub fn parse_request(&self) -> Result<StratumRequest, StratumError> {
        let method = self
            .method
            .as_deref()
            .ok_or_else(|| StratumError::new(INVALID_REQUEST, "missing method"))?;
        let id = self
            .id
            .ok_or_else(|| StratumError::new(INVALID_REQUEST, "missing id"))?;
        let first_param = || {
            self.params
                .as_ref()
                .and_then(|p| p.as_array())
                .and_then(|a| a.first())
        };

        match method {
            METHOD_SUBSCRIBE => Ok(StratumRequest::Subscribe {
                id,
                user_agent: first_param().and_then(|v| v.as_str()).map(String::from),
            }),
            METHOD_AUTHORIZE => {
                let address = first_param()
                    .and_then(|v| v.as_str())
                    .map(Address::new)
                    .ok_or_else(|| StratumError::new(INVALID_PARAMS, "missing worker address"))?;
                if !address.is_well_formed() {
                    return Err(StratumError::new(INVALID_PARAMS, "malformed worker address"));
                }
                Ok(StratumRequest::Authorize { id, address })
            }
            METHOD_SUBMIT => Ok(StratumRequest::Submit {
                id,
                params: params_from(self.params.as_ref())?,
            }),
            METHOD_GET_STATUS => Ok(StratumRequest::GetStatus { id }),
            METHOD_SUBMIT_TRANSACTION => {
                // Accept either `{..tx}` or `[{..tx}]`.
                let params = match self.params.as_ref().and_then(|p| p.as_array()) {
                    Some(_) => first_param(),
                    None => self.params.as_ref(),
                };
                Ok(StratumRequest::SubmitTransaction {
                    id,
                    tx: params_from(params)?,
                })
            }
            other => Err(StratumError::new(
                METHOD_NOT_FOUND,
                format!("unknown method: {}", other),
            )),
        }
    }
}

impl StratumResponse {
    pub fn notify(template: &RoundTemplate) -> serde_json::Result<Self> {
        Ok(StratumResponse::Notification {
            method: METHOD_NOTIFY.to_string(),
            params: serde_json::to_value(template)?,
        })
    }

    pub fn to_message(&self) -> StratumMessage {
        match self {
            StratumResponse::Result { id, result } => StratumMessage {
                id: Some(*id),
                method: None,
                params: None,
                result: Some(result.clone()),
                error: None,
            },
            StratumResponse::Error { id, error } => StratumMessage {
                id: Some(*id),
                method: None,
                params: None,
                result: None,
                error: Some(error.clone()),
            },
            StratumResponse::Notification { method, params } => StratumMessage {
                id: None,
                method: Some(method.clone()),
                params: Some(params.clone()),
                result: None,
                error: None,
            },
        }
    }
}
