//! The manual approval barrier in front of production stages.

use std::future::Future;

use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines, Stdin, Stdout,
};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::GateError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Rejected { reason: String },
}

/// Waits for an external acknowledgment. Implementations may block for as long
/// as the operator takes; no timeout is applied by the pipeline.
pub trait ApprovalGate {
    fn request_approval(
        &self,
        stage: &str,
        comment: &str,
    ) -> impl Future<Output = Result<ApprovalDecision, GateError>> + Send;
}

/// Writes a prompt and reads one answer line per approval.
///
/// The reader lives as long as the gate, so input buffered past one answer is
/// still there for the next prompt.
pub struct ConsoleApproval<R, W> {
    answers: Mutex<Lines<R>>,
    prompt: Mutex<W>,
}

impl ConsoleApproval<BufReader<Stdin>, Stdout> {
    /// Asks on the terminal.
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R: AsyncBufRead + Unpin, W> ConsoleApproval<R, W> {
    pub fn new(answers: R, prompt: W) -> Self {
        Self {
            answers: Mutex::new(answers.lines()),
            prompt: Mutex::new(prompt),
        }
    }

    pub fn into_prompt(self) -> W {
        self.prompt.into_inner()
    }
}

pub(crate) fn parse_answer(answer: &str) -> ApprovalDecision {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "approve" => ApprovalDecision::Approved,
        "" => ApprovalDecision::Rejected {
            reason: "no answer given".to_string(),
        },
        other => ApprovalDecision::Rejected {
            reason: format!("operator answered '{other}'"),
        },
    }
}

impl<R, W> ApprovalGate for ConsoleApproval<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn request_approval(
        &self,
        stage: &str,
        comment: &str,
    ) -> Result<ApprovalDecision, GateError> {
        info!(stage = %stage, comment = %comment, "Waiting for manual approval");
        {
            let mut prompt = self.prompt.lock().await;
            prompt
                .write_all(format!("[{stage}] {comment} [y/N]: ").as_bytes())
                .await?;
            prompt.flush().await?;
        }

        let mut answers = self.answers.lock().await;
        let decision = match answers.next_line().await? {
            Some(answer) => parse_answer(&answer),
            None => ApprovalDecision::Rejected {
                reason: "input closed before an answer was given".to_string(),
            },
        };
        info!(stage = %stage, decision = ?decision, "Manual approval answered");
        Ok(decision)
    }
}

/// Approval was granted outside this process, e.g. by the delivery service's
/// own approval action.
#[derive(Debug)]
pub struct PreApproved {
    pub approver: String,
}

impl ApprovalGate for PreApproved {
    async fn request_approval(
        &self,
        stage: &str,
        comment: &str,
    ) -> Result<ApprovalDecision, GateError> {
        warn!(
            stage = %stage,
            comment = %comment,
            approver = %self.approver,
            "Stage approved ahead of time"
        );
        Ok(ApprovalDecision::Approved)
    }
}
