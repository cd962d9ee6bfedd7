//! Scorer and Mapper backed by a chat model.
//!
//! Both adapters absorb transport and parse failures: the scorer returns a
//! zero-score stub sized to the batch, the mapper reports itself unavailable.

use log::warn;

use crate::{
    error::OracleError,
    oracle::{
        MappingOutcome, Mapper, ScoreOutcome, Scorer,
        chat::ChatTransport,
        parse::{parse_mapping_response, parse_score_response},
        prompt::{mapper_messages, scorer_messages},
    },
    source::Record,
};

pub struct LlmScorer<T> {
    transport: T,
}

impl<T: ChatTransport> LlmScorer<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }
}

impl<T: ChatTransport> Scorer for LlmScorer<T> {
    fn score(&self, raw: &Record, batch: &[Record]) -> Result<ScoreOutcome, OracleError> {
        let candidates = serde_json::Value::Array(batch.iter().map(Record::to_json).collect());
        let messages = scorer_messages(&raw.to_json(), &candidates);
        match self.transport.complete(&messages) {
            Ok(content) => Ok(parse_score_response(&content, batch.len())),
            Err(err) => {
                warn!("Scorer call failed ({err}); substituting zero scores");
                Ok(ScoreOutcome::degraded(err.to_string(), batch.len()))
            }
        }
    }
}

pub struct LlmMapper<T> {
    transport: T,
}

impl<T: ChatTransport> LlmMapper<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }
}

impl<T: ChatTransport> Mapper for LlmMapper<T> {
    fn suggest(
        &self,
        source_columns: &[String],
        target_columns: &[String],
    ) -> Result<MappingOutcome, OracleError> {
        let messages = mapper_messages(source_columns, target_columns);
        let outcome = self
            .transport
            .complete(&messages)
            .and_then(|content| parse_mapping_response(&content));
        match outcome {
            Ok(suggestion) => Ok(MappingOutcome::Suggested(suggestion)),
            Err(err) => {
                warn!("Column mapping failed ({err}); continuing without a mapping");
                Ok(MappingOutcome::Unavailable {
                    reason: err.to_string(),
                })
            }
        }
    }
}
