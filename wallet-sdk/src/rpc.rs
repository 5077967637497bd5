//! Binary-framed RPC protocol of the exchange-rate service.
//!
//! A frame is a 4-byte big-endian length prefix followed by a JSON body.
//! Requests and responses are tagged enums; rate-pair keys use the
//! composite `"FROM_TO"` form from [`Currency::pair_key`].
//!
//! The identity pair (`from == to`) is answered with `rate = 1` and is
//! never stored in the rate table.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::objects::Currency;

/// Upper bound on a frame body. The full rate table is a handful of pairs,
/// so anything larger than this is a protocol violation.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// A request to the exchange-rate service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RateRequest {
    /// Fetch the whole rate table.
    GetRates,
    /// Fetch a single ordered pair.
    GetRate { from: Currency, to: Currency },
}

/// A response from the exchange-rate service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RateResponse {
    /// The full table, keyed by `"FROM_TO"`.
    Rates { rates: BTreeMap<String, Decimal> },
    /// A single pair.
    Rate {
        from: Currency,
        to: Currency,
        rate: Decimal,
    },
    /// The service could not answer, e.g. an unknown pair.
    Error { message: String },
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN}-byte limit")]
    Oversized(usize),

    #[error("malformed frame body: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Write one length-prefixed frame.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(FrameError::Oversized(body.len()));
    }
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, FrameError>
where
    R: AsyncRead + Unpin,
    T: serde::de::DeserializeOwned,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::Oversized(len));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_round_trips_through_a_frame() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let request = RateRequest::GetRate {
            from: Currency::USD,
            to: Currency::EUR,
        };

        write_frame(&mut client, &request).await.unwrap();
        let decoded: RateRequest = read_frame(&mut server).await.unwrap();
        assert_eq!(decoded, request);
    }

    #[tokio::test]
    async fn response_round_trips_through_a_frame() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let mut rates = BTreeMap::new();
        rates.insert("USD_EUR".to_string(), Decimal::new(92, 2));
        rates.insert("EUR_USD".to_string(), Decimal::new(109, 2));
        let response = RateResponse::Rates { rates };

        write_frame(&mut server, &response).await.unwrap();
        let decoded: RateResponse = read_frame(&mut client).await.unwrap();
        assert_eq!(decoded, response);
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_u32((MAX_FRAME_LEN + 1) as u32)
            .await
            .unwrap();

        let result: Result<RateRequest, _> = read_frame(&mut server).await;
        assert!(matches!(result, Err(FrameError::Oversized(_))));
    }

    #[tokio::test]
    async fn truncated_body_is_an_io_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_u32(100).await.unwrap();
        client.write_all(b"short").await.unwrap();
        drop(client);

        let result: Result<RateRequest, _> = read_frame(&mut server).await;
        assert!(matches!(result, Err(FrameError::Io(_))));
    }

    #[tokio::test]
    async fn garbage_body_is_malformed() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_u32(4).await.unwrap();
        client.write_all(b"{{{{").await.unwrap();

        let result: Result<RateRequest, _> = read_frame(&mut server).await;
        assert!(matches!(result, Err(FrameError::Malformed(_))));
    }
}
