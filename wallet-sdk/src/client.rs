//! Client for the exchange-rate service.
//!
//! One persistent connection, one in-flight call at a time, a mandatory
//! per-call deadline. The client carries no retry policy: whether a failed
//! call is safe to repeat is the caller's decision.

use std::collections::BTreeMap;
use std::time::Duration;

use rust_decimal::Decimal;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use crate::objects::Currency;
use crate::rpc::{read_frame, write_frame, FrameError, RateRequest, RateResponse};

/// Default per-call deadline.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors surfaced by [`RateClient`].
#[derive(Debug, Error)]
pub enum RateError {
    /// Transport-level failure: connect, read, or write.
    #[error("rate service unavailable: {0}")]
    Unavailable(String),

    /// The per-call deadline elapsed.
    #[error("rate service call timed out after {0:?}")]
    Timeout(Duration),

    /// The service has no rate for the requested pair.
    #[error("no rate published for {from}->{to}")]
    NotFound { from: Currency, to: Currency },

    /// The service answered with something the protocol does not allow here.
    #[error("rate service protocol error: {0}")]
    Protocol(String),
}

impl From<FrameError> for RateError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(e) => RateError::Unavailable(e.to_string()),
            other => RateError::Protocol(other.to_string()),
        }
    }
}

/// Connection-holding client for the exchange-rate service.
pub struct RateClient {
    addr: String,
    call_timeout: Duration,
    conn: Mutex<Option<TcpStream>>,
}

impl RateClient {
    /// Create a client that connects lazily on the first call.
    pub fn new(addr: impl Into<String>, call_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            call_timeout,
            conn: Mutex::new(None),
        }
    }

    /// Fetch the whole rate table, keyed by `"FROM_TO"`.
    pub async fn get_all_rates(&self) -> Result<BTreeMap<String, Decimal>, RateError> {
        match self.call(&RateRequest::GetRates).await? {
            RateResponse::Rates { rates } => {
                debug!(pairs = rates.len(), "received rate table");
                Ok(rates)
            }
            RateResponse::Error { message } => Err(RateError::Unavailable(message)),
            other => Err(RateError::Protocol(format!(
                "unexpected response to GetRates: {other:?}"
            ))),
        }
    }

    /// Fetch the rate of a single ordered pair.
    ///
    /// The identity pair is answered locally with `rate = 1`, matching the
    /// service contract.
    pub async fn get_rate(&self, from: Currency, to: Currency) -> Result<Decimal, RateError> {
        if from == to {
            return Ok(Decimal::ONE);
        }
        match self.call(&RateRequest::GetRate { from, to }).await? {
            RateResponse::Rate { rate, .. } => Ok(rate),
            RateResponse::Error { .. } => Err(RateError::NotFound { from, to }),
            other => Err(RateError::Protocol(format!(
                "unexpected response to GetRate: {other:?}"
            ))),
        }
    }

    /// Health check: the table fetch doubles as the liveness probe.
    pub async fn ping(&self) -> Result<(), RateError> {
        self.get_all_rates().await.map(|_| ())
    }

    /// Drop the persistent connection. The next call reconnects.
    pub async fn close(&self) {
        self.conn.lock().await.take();
    }

    /// Issue one request/response exchange under the call deadline.
    ///
    /// The connection is dropped on any failure so the next call starts
    /// from a clean connect.
    async fn call(&self, request: &RateRequest) -> Result<RateResponse, RateError> {
        let mut guard = self.conn.lock().await;
        let result = tokio::time::timeout(self.call_timeout, async {
            if guard.is_none() {
                let stream = TcpStream::connect(&self.addr)
                    .await
                    .map_err(|e| RateError::Unavailable(e.to_string()))?;
                *guard = Some(stream);
            }
            let stream = guard.as_mut().expect("connection just established");
            write_frame(stream, request).await?;
            let response: RateResponse = read_frame(stream).await?;
            Ok::<_, RateError>(response)
        })
        .await;

        match result {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => {
                guard.take();
                Err(err)
            }
            Err(_) => {
                guard.take();
                Err(RateError::Timeout(self.call_timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn spawn_rate_service(rates: BTreeMap<String, Decimal>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let rates = rates.clone();
                tokio::spawn(async move {
                    loop {
                        let request: RateRequest = match read_frame(&mut stream).await {
                            Ok(r) => r,
                            Err(_) => return,
                        };
                        let response = match request {
                            RateRequest::GetRates => RateResponse::Rates {
                                rates: rates.clone(),
                            },
                            RateRequest::GetRate { from, to } => {
                                match rates.get(&Currency::pair_key(from, to)) {
                                    Some(rate) => RateResponse::Rate {
                                        from,
                                        to,
                                        rate: *rate,
                                    },
                                    None => RateResponse::Error {
                                        message: format!("no rate for {from}->{to}"),
                                    },
                                }
                            }
                        };
                        if write_frame(&mut stream, &response).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });

        addr
    }

    fn sample_rates() -> BTreeMap<String, Decimal> {
        let mut rates = BTreeMap::new();
        rates.insert("USD_EUR".to_string(), Decimal::new(92, 2));
        rates.insert("EUR_USD".to_string(), Decimal::new(109, 2));
        rates.insert("USD_RUB".to_string(), Decimal::new(955, 1));
        rates
    }

    #[tokio::test]
    async fn fetches_the_full_table() {
        let addr = spawn_rate_service(sample_rates()).await;
        let client = RateClient::new(addr, DEFAULT_CALL_TIMEOUT);

        let rates = client.get_all_rates().await.unwrap();
        assert_eq!(rates, sample_rates());
    }

    #[tokio::test]
    async fn fetches_a_single_pair_over_a_reused_connection() {
        let addr = spawn_rate_service(sample_rates()).await;
        let client = RateClient::new(addr, DEFAULT_CALL_TIMEOUT);

        let usd_eur = client.get_rate(Currency::USD, Currency::EUR).await.unwrap();
        assert_eq!(usd_eur, Decimal::new(92, 2));

        // Second call travels over the same connection.
        let eur_usd = client.get_rate(Currency::EUR, Currency::USD).await.unwrap();
        assert_eq!(eur_usd, Decimal::new(109, 2));
    }

    #[tokio::test]
    async fn identity_pair_is_answered_locally() {
        // No service behind the address: the call must not go out.
        let client = RateClient::new("127.0.0.1:9", DEFAULT_CALL_TIMEOUT);
        let rate = client.get_rate(Currency::EUR, Currency::EUR).await.unwrap();
        assert_eq!(rate, Decimal::ONE);
    }

    #[tokio::test]
    async fn unknown_pair_maps_to_not_found() {
        let addr = spawn_rate_service(BTreeMap::new()).await;
        let client = RateClient::new(addr, DEFAULT_CALL_TIMEOUT);

        let err = client
            .get_rate(Currency::USD, Currency::EUR)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RateError::NotFound {
                from: Currency::USD,
                to: Currency::EUR
            }
        ));
    }

    #[tokio::test]
    async fn silent_service_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        // Accept and then sit on the connection without answering.
        tokio::spawn(async move {
            let _conn = listener.accept().await;
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let client = RateClient::new(addr, Duration::from_millis(100));
        let err = client.get_all_rates().await.unwrap_err();
        assert!(matches!(err, RateError::Timeout(_)));
    }

    #[tokio::test]
    async fn refused_connection_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let client = RateClient::new(addr, DEFAULT_CALL_TIMEOUT);
        let err = client.get_all_rates().await.unwrap_err();
        assert!(matches!(err, RateError::Unavailable(_)));
    }

    #[tokio::test]
    async fn reconnects_after_the_service_drops_the_connection() {
        let addr = spawn_rate_service(sample_rates()).await;
        let client = RateClient::new(addr, DEFAULT_CALL_TIMEOUT);

        assert!(client.get_all_rates().await.is_ok());
        client.close().await;
        assert!(client.get_all_rates().await.is_ok());
    }
}
