//! Subscription parameters and the connection-string encoding sent with a
//! Subscribe command.
//!
//! `SubscriptionInfo` is a plain record; load it from a config file via
//! serde or build it in code, then hand it to
//! [`crate::DataSubscriber::subscribe`]. The subscriber keeps the most
//! recent one for the lifetime of the subscription.

use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Parameters describing which signals to receive and how to receive them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionInfo {
    /// Enable publisher-side throttling to the latest value per signal
    pub throttled: bool,
    /// Transmit per-measurement timestamps (absolute); when false,
    /// timestamps arrive as compact deltas against the base-time offsets
    pub include_time: bool,
    /// Allowed lag relative to real time, in seconds
    pub lag_time: f64,
    /// Allowed lead relative to real time, in seconds
    pub lead_time: f64,
    /// Publisher uses its local wall clock as the real-time reference
    pub use_local_clock_as_real_time: bool,
    /// Replay pacing in milliseconds; -1 requests full speed
    pub processing_interval: i32,
    /// Compact timestamp deltas are millisecond-granular
    pub use_millisecond_resolution: bool,
    /// Filter expression selecting input measurements; opaque to the
    /// subscriber
    pub filter_expression: String,
    /// Request a UDP side channel for data packets
    pub udp_data_channel: bool,
    /// Local UDP port to bind when `udp_data_channel` is set
    pub data_channel_local_port: u16,
    /// Local interface name/address for the UDP channel, if any
    pub data_channel_interface: String,
    /// Temporal replay start bound
    pub start_time: String,
    /// Temporal replay stop bound
    pub stop_time: String,
    /// Extra parameters for the temporal constraint
    pub constraint_parameters: String,
    /// Publisher-side wait handles to coordinate with
    pub wait_handle_names: String,
    /// Timeout for the wait handles, in milliseconds
    pub wait_handle_timeout: u32,
    /// Appended verbatim to the generated connection string
    pub extra_connection_string_parameters: String,
}

impl Default for SubscriptionInfo {
    fn default() -> Self {
        Self {
            throttled: false,
            include_time: true,
            lag_time: 10.0,
            lead_time: 5.0,
            use_local_clock_as_real_time: false,
            processing_interval: -1,
            use_millisecond_resolution: false,
            filter_expression: String::new(),
            udp_data_channel: false,
            data_channel_local_port: 0,
            data_channel_interface: String::new(),
            start_time: String::new(),
            stop_time: String::new(),
            constraint_parameters: String::new(),
            wait_handle_names: String::new(),
            wait_handle_timeout: 0,
            extra_connection_string_parameters: String::new(),
        }
    }
}

impl SubscriptionInfo {
    /// Render the semicolon-delimited `key=value` connection string.
    ///
    /// The throttling, time, and resolution knobs are always emitted;
    /// string-valued options are emitted only when non-empty, and any
    /// extra parameters are appended verbatim.
    pub fn to_connection_string(&self) -> String {
        let mut out = String::new();

        let _ = write!(out, "trackLatestMeasurements={};", self.throttled);
        let _ = write!(out, "includeTime={};", self.include_time);
        let _ = write!(out, "lagTime={};", self.lag_time);
        let _ = write!(out, "leadTime={};", self.lead_time);
        let _ = write!(
            out,
            "useLocalClockAsRealTime={};",
            self.use_local_clock_as_real_time
        );
        let _ = write!(out, "processingInterval={};", self.processing_interval);
        let _ = write!(
            out,
            "useMillisecondResolution={};",
            self.use_millisecond_resolution
        );

        if !self.filter_expression.is_empty() {
            let _ = write!(out, "inputMeasurementKeys={{{}}};", self.filter_expression);
        }

        if self.udp_data_channel {
            out.push_str("dataChannel={");
            if !self.data_channel_interface.is_empty() {
                let _ = write!(out, "interface={};", self.data_channel_interface);
            }
            let _ = write!(out, "localport={}}};", self.data_channel_local_port);
        }

        if !self.start_time.is_empty() {
            let _ = write!(out, "startTimeConstraint={};", self.start_time);
        }
        if !self.stop_time.is_empty() {
            let _ = write!(out, "stopTimeConstraint={};", self.stop_time);
        }
        if !self.constraint_parameters.is_empty() {
            let _ = write!(out, "timeConstraintParameters={};", self.constraint_parameters);
        }

        if !self.wait_handle_names.is_empty() {
            let _ = write!(out, "waitHandleNames={};", self.wait_handle_names);
            let _ = write!(out, "waitHandleTimeout={};", self.wait_handle_timeout);
        }

        if !self.extra_connection_string_parameters.is_empty() {
            let _ = write!(out, "{};", self.extra_connection_string_parameters);
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_connection_string_has_only_base_options() {
        let info = SubscriptionInfo::default();
        let cs = info.to_connection_string();

        assert!(cs.contains("trackLatestMeasurements=false;"));
        assert!(cs.contains("includeTime=true;"));
        assert!(cs.contains("lagTime=10;"));
        assert!(cs.contains("leadTime=5;"));
        assert!(cs.contains("processingInterval=-1;"));
        assert!(cs.contains("useMillisecondResolution=false;"));
        assert!(!cs.contains("inputMeasurementKeys"));
        assert!(!cs.contains("dataChannel"));
        assert!(!cs.contains("startTimeConstraint"));
        assert!(!cs.contains("waitHandleNames"));
        assert!(cs.ends_with(';'));
    }

    #[test]
    fn filter_expression_is_braced() {
        let info = SubscriptionInfo {
            filter_expression: "FILTER ActiveMeasurements WHERE SignalType = 'FREQ'".into(),
            ..Default::default()
        };
        assert!(info.to_connection_string().contains(
            "inputMeasurementKeys={FILTER ActiveMeasurements WHERE SignalType = 'FREQ'};"
        ));
    }

    #[test]
    fn data_channel_block_includes_interface_only_when_set() {
        let mut info = SubscriptionInfo {
            udp_data_channel: true,
            data_channel_local_port: 9500,
            ..Default::default()
        };
        assert!(info.to_connection_string().contains("dataChannel={localport=9500};"));

        info.data_channel_interface = "0.0.0.0".into();
        assert!(
            info.to_connection_string()
                .contains("dataChannel={interface=0.0.0.0;localport=9500};")
        );
    }

    #[test]
    fn wait_handles_and_extra_parameters() {
        let info = SubscriptionInfo {
            wait_handle_names: "historian".into(),
            wait_handle_timeout: 3000,
            extra_connection_string_parameters: "bufferSize=8".into(),
            ..Default::default()
        };
        let cs = info.to_connection_string();
        assert!(cs.contains("waitHandleNames=historian;"));
        assert!(cs.contains("waitHandleTimeout=3000;"));
        assert!(cs.ends_with("bufferSize=8;"));
    }
}
