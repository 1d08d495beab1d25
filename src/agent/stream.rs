//! Assembly of an incremental inference response into one string.
//!
//! The accumulator is single-use and moves `Open -> Accumulating -> Closed`.
//! A fault at any point closes it in the failed state and drops whatever text
//! had arrived, so callers only ever see a complete response or an error.

use std::fmt::Display;

use futures::{Stream, StreamExt};
use thiserror::Error;

use crate::agent::types::StreamEvent;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("transport failed mid-stream: {0}")]
    Transport(String),

    #[error("stream ended without a terminal marker")]
    UnexpectedEnd,

    #[error("stream already closed")]
    AlreadyClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorState {
    Open,
    Accumulating,
    Closed,
}

#[derive(Debug)]
pub struct ResponseStreamAccumulator {
    state: AccumulatorState,
    text: String,
    failure: Option<StreamError>,
}

impl Default for ResponseStreamAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseStreamAccumulator {
    pub fn new() -> Self {
        Self {
            state: AccumulatorState::Open,
            text: String::new(),
            failure: None,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> AccumulatorState {
        self.state
    }

    /// Apply one event. Events after close are rejected.
    pub fn push(&mut self, event: StreamEvent) -> Result<(), StreamError> {
        if self.state == AccumulatorState::Closed {
            return Err(StreamError::AlreadyClosed);
        }

        match event {
            StreamEvent::Fragment(fragment) => {
                self.state = AccumulatorState::Accumulating;
                self.text.push_str(&fragment);
            }
            StreamEvent::Terminal => {
                self.state = AccumulatorState::Closed;
            }
        }
        Ok(())
    }

    /// Close on a transport fault, discarding partial text.
    pub fn fail(&mut self, error: StreamError) {
        self.state = AccumulatorState::Closed;
        self.text.clear();
        self.failure = Some(error);
    }

    pub fn finish(self) -> Result<String, StreamError> {
        if let Some(failure) = self.failure {
            return Err(failure);
        }
        match self.state {
            AccumulatorState::Closed => Ok(self.text),
            AccumulatorState::Open | AccumulatorState::Accumulating => Err(StreamError::UnexpectedEnd),
        }
    }

    /// Drain `stream` until its terminal marker and return the full text.
    pub async fn collect<S, E>(mut self, stream: S) -> Result<String, StreamError>
    where
        S: Stream<Item = Result<StreamEvent, E>>,
        E: Display,
    {
        futures::pin_mut!(stream);

        while let Some(item) = stream.next().await {
            match item {
                Ok(event) => {
                    if let Err(e) = self.push(event) {
                        self.fail(e);
                        break;
                    }
                }
                Err(e) => {
                    self.fail(StreamError::Transport(e.to_string()));
                    break;
                }
            }
            if self.state == AccumulatorState::Closed {
                break;
            }
        }

        self.finish()
    }
}
