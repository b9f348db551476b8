//! Telestream Protocol Buffers
//!
//! Generated protobuf code for the device-side gRPC APIs the collector dials.
//!
//! This crate contains:
//! - `juniper::authentication` for the JUNOS `Login` handshake
//! - `juniper::telemetry` for the JUNOS `OpenConfigTelemetry` stream
//! - `cisco::mdt` for the IOS-XR `gRPCConfigOper` dial-in stream

#![allow(clippy::derive_partial_eq_without_eq)]

/// Juniper JUNOS protocol definitions.
pub mod juniper {
    /// `Login.LoginCheck` client and messages.
    pub mod authentication {
        tonic::include_proto!("authentication");
    }

    /// `OpenConfigTelemetry.telemetrySubscribe` client and messages.
    pub mod telemetry {
        tonic::include_proto!("telemetry");
    }
}

/// Cisco IOS-XR protocol definitions.
pub mod cisco {
    /// Model-driven telemetry dial-in (`gRPCConfigOper.CreateSubs`).
    pub mod mdt {
        tonic::include_proto!("iosxr_extensible_managability_service");
    }
}
