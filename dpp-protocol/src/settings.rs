//! Engine tunables. Every field has a default, so a settings file only
//! needs the values it changes.

use std::time::Duration;

use dpp_core::constants::{
    CHIRP_CHANNEL_WAIT_MS, CHIRP_ROUND_WAIT_MS, DEFAULT_INIT_MAX_TRIES,
    DEFAULT_INIT_RETRY_TIME_MS, DEFAULT_PKEX_T_LIMIT, DEFAULT_RESP_MAX_TRIES,
    DEFAULT_RESP_RETRY_TIME_MS, DEFAULT_RESP_WAIT_TIME_MS, DPP_VERSION,
};
use serde::{Deserialize, Serialize};

use crate::auth::AuthParams;
use crate::capability::Capability;
use crate::connector::NetRole;

/// Retry budgets and waits for one engine. Times are milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Auth Responses sent before giving up on the Confirm.
    pub resp_max_tries: u32,
    pub resp_retry_time: u64,
    /// Auth Request attempts across the peer's channels.
    pub init_max_tries: u32,
    pub init_retry_time: u64,
    /// Wait for an Auth Response after a successful transmit.
    pub resp_wait_time: u64,
    /// Round-trip budget for one Config Request/Response.
    pub conf_resp_budget: u64,
    pub conf_result_wait: u64,
    pub conn_status_wait: u64,
    pub chirp_channel_wait: u64,
    pub chirp_round_wait: u64,
    /// Failed PKEX attempts per source before it is ignored.
    pub pkex_t_limit: u32,
    pub allowed_roles: Capability,
    pub qr_mutual: bool,
    pub protocol_version: u8,
    /// `name` sent in Config Attributes.
    pub device_name: String,
    /// Network role an Enrollee asks for.
    pub net_role: NetRole,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            resp_max_tries: DEFAULT_RESP_MAX_TRIES,
            resp_retry_time: DEFAULT_RESP_RETRY_TIME_MS,
            init_max_tries: DEFAULT_INIT_MAX_TRIES,
            init_retry_time: DEFAULT_INIT_RETRY_TIME_MS,
            resp_wait_time: DEFAULT_RESP_WAIT_TIME_MS,
            conf_resp_budget: 10_000,
            conf_result_wait: 2_000,
            conn_status_wait: 16_000,
            chirp_channel_wait: CHIRP_CHANNEL_WAIT_MS,
            chirp_round_wait: CHIRP_ROUND_WAIT_MS,
            pkex_t_limit: DEFAULT_PKEX_T_LIMIT,
            allowed_roles: Capability::Enrollee,
            qr_mutual: false,
            protocol_version: DPP_VERSION,
            device_name: "Test".into(),
            net_role: NetRole::Sta,
        }
    }
}

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

impl EngineSettings {
    pub fn auth_params(&self) -> AuthParams {
        AuthParams {
            capability: self.allowed_roles,
            version: self.protocol_version,
            qr_mutual: self.qr_mutual,
        }
    }

    pub fn resp_retry(&self) -> Duration {
        ms(self.resp_retry_time)
    }

    pub fn init_retry(&self) -> Duration {
        ms(self.init_retry_time)
    }

    pub fn resp_wait(&self) -> Duration {
        ms(self.resp_wait_time)
    }

    pub fn conf_budget(&self) -> Duration {
        ms(self.conf_resp_budget)
    }

    pub fn result_wait(&self) -> Duration {
        ms(self.conf_result_wait)
    }

    pub fn status_wait(&self) -> Duration {
        ms(self.conn_status_wait)
    }

    pub fn chirp_channel(&self) -> Duration {
        ms(self.chirp_channel_wait)
    }

    pub fn chirp_round(&self) -> Duration {
        ms(self.chirp_round_wait)
    }
}
