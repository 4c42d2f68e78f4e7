//! Controller configuration and the `param_set`/`param_get` parameter
//! façade (spec §6 "Runtime parameters").

use gcs_wire::GcsError;

/// Tunables read once at construction time; everything mutable at runtime
/// goes through [`ControllerConfig::set`]/[`ControllerConfig::get`] instead.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub fc_base_limit: u64,
    pub fc_resume_factor: f64,
    pub fc_master_slave: bool,
    pub fc_debug: bool,
    pub sync_donor: bool,
    pub max_packet_size: usize,
    pub recv_q_hard_limit: u64,
    pub recv_q_soft_limit: u64,
    pub max_throttle: f64,
    pub vote_policy: u8,
    pub send_fifo_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            fc_base_limit: 16,
            fc_resume_factor: 0.5,
            fc_master_slave: false,
            fc_debug: false,
            sync_donor: false,
            max_packet_size: 64 * 1024,
            recv_q_hard_limit: u64::MAX,
            recv_q_soft_limit: 16 * 1024,
            max_throttle: 0.25,
            vote_policy: 0,
            send_fifo_capacity: 1 << 16,
        }
    }
}

impl ControllerConfig {
    /// Sets one recognized runtime parameter by its `gcs.*`-style key.
    ///
    /// # Errors
    ///
    /// - [`GcsError::UnknownParam`] if `key` is not one of the recognized
    ///   controller-level keys (caller should then try the membership
    ///   engine, then the transport).
    /// - [`GcsError::InvalidParam`] if `value` fails to parse for `key`'s
    ///   type.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), GcsError> {
        macro_rules! parse {
            ($target:expr) => {
                value.parse().map_err(|_| GcsError::InvalidParam {
                    key: key.to_string(),
                    reason: format!("cannot parse {value:?}"),
                })?
            };
        }
        match key {
            "fc_base_limit" => self.fc_base_limit = parse!(self.fc_base_limit),
            "fc_resume_factor" => self.fc_resume_factor = parse!(self.fc_resume_factor),
            "fc_master_slave" => self.fc_master_slave = parse!(self.fc_master_slave),
            "fc_debug" => self.fc_debug = parse!(self.fc_debug),
            "sync_donor" => self.sync_donor = parse!(self.sync_donor),
            "max_packet_size" => self.max_packet_size = parse!(self.max_packet_size),
            "recv_q_hard_limit" => self.recv_q_hard_limit = parse!(self.recv_q_hard_limit),
            "recv_q_soft_limit" => self.recv_q_soft_limit = parse!(self.recv_q_soft_limit),
            "max_throttle" => self.max_throttle = parse!(self.max_throttle),
            "vote_policy" => self.vote_policy = parse!(self.vote_policy),
            other => return Err(GcsError::UnknownParam(other.to_string())),
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`GcsError::UnknownParam`] if `key` is not recognized.
    pub fn get(&self, key: &str) -> Result<String, GcsError> {
        Ok(match key {
            "fc_base_limit" => self.fc_base_limit.to_string(),
            "fc_resume_factor" => self.fc_resume_factor.to_string(),
            "fc_master_slave" => self.fc_master_slave.to_string(),
            "fc_debug" => self.fc_debug.to_string(),
            "sync_donor" => self.sync_donor.to_string(),
            "max_packet_size" => self.max_packet_size.to_string(),
            "recv_q_hard_limit" => self.recv_q_hard_limit.to_string(),
            "recv_q_soft_limit" => self.recv_q_soft_limit.to_string(),
            "max_throttle" => self.max_throttle.to_string(),
            "vote_policy" => self.vote_policy.to_string(),
            other => return Err(GcsError::UnknownParam(other.to_string())),
        })
    }
}
