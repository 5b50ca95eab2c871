// Copyright (c) Liftnet Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error types for the network layer.

use thiserror::Error;

/// Result type alias for network operations.
pub type Result<T> = std::result::Result<T, NetworkError>;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("tls setup failed: {0}")]
    Tls(String),

    #[error("endpoint setup failed: {0}")]
    Endpoint(#[from] std::io::Error),

    #[error("dial failed: {0}")]
    Connect(#[from] quinn::ConnectError),

    #[error("connection lost: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("stream write failed: {0}")]
    Write(#[from] quinn::WriteError),

    #[error("stream read failed: {0}")]
    Read(#[from] quinn::ReadExactError),

    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("frame write timed out")]
    WriteTimeout,

    #[error("invalid hello frame")]
    BadHello,

    #[error("frame payload too large: {got} > {max}")]
    FrameTooLarge { got: usize, max: usize },
}
