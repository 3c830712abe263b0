//! Scripted collaborators for tests.
//!
//! Enabled with the `test-utils` feature.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use raptorq_lib::{EngineError, Result};
use rust_decimal::Decimal;

use crate::ads::banner::{IHDR_END, PNG_SIGNATURE};
use crate::amount::Amount;
use crate::oracle::PriceFeed;
use crate::payment::PaymentOracle;

#[derive(Debug, Clone)]
struct FeedScript {
    rate: Decimal,
    failure: Option<String>,
    delay: Option<Duration>,
}

/// Price feed whose answer can be changed between calls.
#[derive(Debug)]
pub struct ScriptedPriceFeed {
    script: Mutex<FeedScript>,
    calls: AtomicUsize,
}

impl ScriptedPriceFeed {
    pub fn new(rate: Decimal) -> Self {
        Self {
            script: Mutex::new(FeedScript {
                rate,
                failure: None,
                delay: None,
            }),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of fetches so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Answer with `rate` from now on (clears any failure).
    pub fn set_rate(&self, rate: Decimal) {
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        script.rate = rate;
        script.failure = None;
    }

    /// Fail every fetch with `reason`.
    pub fn fail_with(&self, reason: &str) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .failure = Some(reason.to_string());
    }

    /// Sleep before answering.
    pub fn set_delay(&self, delay: Duration) {
        self.script.lock().unwrap_or_else(|e| e.into_inner()).delay = Some(delay);
    }
}

#[async_trait]
impl PriceFeed for ScriptedPriceFeed {
    fn source_name(&self) -> &str {
        "scripted"
    }

    async fn fetch_rate(&self) -> Result<Decimal> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self.script.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }
        match script.failure {
            Some(reason) => Err(EngineError::upstream("scripted", reason)),
            None => Ok(script.rate),
        }
    }
}

#[derive(Debug, Clone)]
enum Answer {
    Accept(bool),
    Fail(String),
}

#[derive(Debug)]
struct OracleScript {
    answer: Answer,
    delay: Option<Duration>,
    last_amount: Option<Amount>,
}

/// Payment oracle with a configurable answer.
#[derive(Debug)]
pub struct ScriptedPaymentOracle {
    script: Mutex<OracleScript>,
    calls: AtomicUsize,
}

impl ScriptedPaymentOracle {
    /// Oracle that confirms every payment.
    pub fn accepting() -> Self {
        Self {
            script: Mutex::new(OracleScript {
                answer: Answer::Accept(true),
                delay: None,
                last_amount: None,
            }),
            calls: AtomicUsize::new(0),
        }
    }

    /// Oracle that finds no payment.
    pub fn rejecting() -> Self {
        let oracle = Self::accepting();
        oracle.answer(false);
        oracle
    }

    pub fn answer(&self, paid: bool) {
        self.script.lock().unwrap_or_else(|e| e.into_inner()).answer = Answer::Accept(paid);
    }

    pub fn fail_with(&self, reason: &str) {
        self.script.lock().unwrap_or_else(|e| e.into_inner()).answer =
            Answer::Fail(reason.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        self.script.lock().unwrap_or_else(|e| e.into_inner()).delay = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Amount asked for in the most recent call.
    pub fn last_amount(&self) -> Option<Amount> {
        self.script.lock().unwrap_or_else(|e| e.into_inner()).last_amount
    }
}

#[async_trait]
impl PaymentOracle for ScriptedPaymentOracle {
    async fn verify(
        &self,
        _tx_reference: &str,
        _expected_recipient: &str,
        expected_amount: Amount,
    ) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (answer, delay) = {
            let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
            script.last_amount = Some(expected_amount);
            (script.answer.clone(), script.delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match answer {
            Answer::Accept(paid) => Ok(paid),
            Answer::Fail(reason) => Err(EngineError::upstream("payment oracle", reason)),
        }
    }
}

/// PNG header with the given dimensions, zero-padded to `size` bytes.
pub fn png_banner(width: u32, height: u32, size: usize) -> Vec<u8> {
    let mut data = PNG_SIGNATURE.to_vec();
    data.extend_from_slice(&13u32.to_be_bytes());
    data.extend_from_slice(b"IHDR");
    data.extend_from_slice(&width.to_be_bytes());
    data.extend_from_slice(&height.to_be_bytes());
    data.resize(size.max(IHDR_END), 0);
    data
}
