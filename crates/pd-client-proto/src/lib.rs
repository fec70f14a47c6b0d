//! Generated types and gRPC client/server stubs for the PD wire protocol.
//!
//! Everything in this crate is produced by `tonic-build` from
//! `proto/pdpb.proto` at build time; nothing here is hand-maintained. The
//! server trait is generated alongside the client so that tests elsewhere
//! in the workspace can stand up an in-process mock PD.

tonic::include_proto!("pdpb");

pub use pd_client::PdClient as PdGrpcClient;
pub use pd_server::{Pd, PdServer};
