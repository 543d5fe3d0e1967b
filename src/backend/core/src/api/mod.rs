//! gRPC glue for the inter-service surface.
//!
//! The wire schema lives in `proto/medic.proto`; this module exposes the
//! generated code and the conversions between wire and domain types.

pub mod grpc;

/// Generated protobuf code.
pub mod proto {
    tonic::include_proto!("medic.v1");
}
