// Copyright (c) Liftnet Contributors
// SPDX-License-Identifier: Apache-2.0

//! # Liftnet Network
//!
//! Peer networking for the elevator group: a QUIC transport carrying
//! fixed-size JSON frames between statically configured peers, and the
//! world-view replicator that gossips per-car states and the hall request
//! matrix across the building.
//!
//! ## Architecture
//!
//! - **frame**: 1024-byte zero-padded framing and the HELLO handshake frame
//! - **tls**: self-signed TLS 1.3 material and the QUIC transport tuning
//! - **peer_manager**: connection lifecycle (dial rule, dedupe, redial with
//!   backoff) and fan-out of outbound frames
//! - **world_view**: merge, dedupe, liveness, coherence and the replicator
//!   task publishing snapshots downstream

pub mod error;
pub mod frame;
pub mod peer_manager;
pub mod tls;
pub mod world_view;

pub use error::{NetworkError, Result};
pub use frame::{decode_hello, encode_frame, encode_hello, trim_zeros, FRAME_SIZE};
pub use peer_manager::{IncomingFrame, PeerConfig, PeerManager};
pub use world_view::{Replicator, ReplicatorChannels, WorldView, WorldViewConfig};
