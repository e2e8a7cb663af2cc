use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

static AMOUNT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"승인\s*금액\s*[:：]?\s*([0-9][0-9,]*)").expect("amount pattern compiles")
});

static APPROVAL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"승인\s*번호\s*[:：]?\s*([0-9]+)").expect("approval pattern compiles")
});

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum OcrError {
    #[error("Receipt OCR is not configured")]
    Unavailable,
    #[error("OCR engine failed: {0}")]
    Engine(String),
    #[error("OCR engine timed out after {0:?}")]
    Timeout(Duration),
    #[error("No approval amount found on the receipt")]
    AmountNotFound,
    #[error("Unreadable approval amount: {0}")]
    InvalidAmount(String),
}

/// What we take from a card receipt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReceiptScan {
    /// Approved amount in minor currency units
    pub amount: u64,
    /// Card approval number, when printed
    pub approval_no: Option<String>,
}

/// Pull the approval amount and approval number out of OCR text.
pub fn parse_receipt_text(text: &str) -> Result<ReceiptScan, OcrError> {
    let raw_amount = AMOUNT_PATTERN
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .ok_or(OcrError::AmountNotFound)?;

    let digits: String = raw_amount.chars().filter(|c| *c != ',').collect();
    let amount: u64 = digits
        .parse()
        .map_err(|_| OcrError::InvalidAmount(raw_amount.to_string()))?;
    if amount == 0 {
        return Err(OcrError::InvalidAmount(raw_amount.to_string()));
    }

    let approval_no = APPROVAL_PATTERN
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    Ok(ReceiptScan { amount, approval_no })
}

/// Receipt image to text. Extraction quality is the engine's business; we
/// only parse what comes back.
#[async_trait]
pub trait ReceiptReader: Send + Sync {
    async fn read_text(&self, image: &[u8]) -> Result<String, OcrError>;

    async fn scan(&self, image: &[u8]) -> Result<ReceiptScan, OcrError> {
        let text = self.read_text(image).await?;
        parse_receipt_text(&text)
    }

    async fn extract_amount(&self, image: &[u8]) -> Result<u64, OcrError> {
        Ok(self.scan(image).await?.amount)
    }
}

/// Used when no OCR command is configured
pub struct DisabledReceiptReader;

#[async_trait]
impl ReceiptReader for DisabledReceiptReader {
    async fn read_text(&self, _image: &[u8]) -> Result<String, OcrError> {
        Err(OcrError::Unavailable)
    }
}

/// Returns the same text for every image
pub struct MockReceiptReader {
    text: String,
}

impl MockReceiptReader {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
impl ReceiptReader for MockReceiptReader {
    async fn read_text(&self, image: &[u8]) -> Result<String, OcrError> {
        tracing::debug!("Mock OCR for {} byte image", image.len());
        Ok(self.text.clone())
    }
}

/// Runs an external OCR program, writing the image to its stdin and reading
/// text from its stdout, e.g. `tesseract stdin stdout -l kor`.
pub struct CommandReceiptReader {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandReceiptReader {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }
}

#[async_trait]
impl ReceiptReader for CommandReceiptReader {
    async fn read_text(&self, image: &[u8]) -> Result<String, OcrError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OcrError::Engine(format!("failed to start {}: {}", self.program, e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| OcrError::Engine("stdin not captured".to_string()))?;
        let payload = image.to_vec();
        // Feed stdin concurrently so a chatty engine cannot deadlock on a full stdout pipe.
        let writer = tokio::spawn(async move {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await
        });

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| OcrError::Timeout(self.timeout))?
            .map_err(|e| OcrError::Engine(e.to_string()))?;

        // The engine may exit before draining stdin; a broken pipe here is not an error.
        if let Ok(Err(e)) = writer.await {
            tracing::debug!("OCR stdin closed early: {}", e);
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Engine(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
