//! The UDP wire protocol running jobs use to report in. Each datagram
//! carries exactly one message: a one-byte type tag followed by a
//! bincode-encoded payload. The encoding is shared verbatim by
//! `hopt-worker` (the sender) and `hopt-orchestrator`'s communication
//! server (the receiver).

use std::collections::BTreeMap;
use std::fmt;

const TAG_JOB_STARTED: u8 = 0;
const TAG_ERROR_ENCOUNTERED: u8 = 1;
const TAG_JOB_SENT_RESULTS: u8 = 2;
const TAG_JOB_CONCLUDED: u8 = 3;

/// One message sent from a running job to the communication server.
#[derive(Clone, Debug, PartialEq)]
pub enum WireMessage {
    JobStarted { job_id: u64 },
    ErrorEncountered { job_id: u64, traceback: String },
    JobSentResults { job_id: u64, metrics: BTreeMap<String, f64> },
    JobConcluded { job_id: u64 },
}

impl WireMessage {
    pub fn job_id(&self) -> u64 {
        match self {
            WireMessage::JobStarted { job_id }
            | WireMessage::ErrorEncountered { job_id, .. }
            | WireMessage::JobSentResults { job_id, .. }
            | WireMessage::JobConcluded { job_id } => *job_id,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let (tag, payload): (u8, Vec<u8>) = match self {
            WireMessage::JobStarted { job_id } => {
                (TAG_JOB_STARTED, bincode::serialize(job_id).unwrap())
            }
            WireMessage::ErrorEncountered { job_id, traceback } => (
                TAG_ERROR_ENCOUNTERED,
                bincode::serialize(&(job_id, traceback)).unwrap(),
            ),
            WireMessage::JobSentResults { job_id, metrics } => (
                TAG_JOB_SENT_RESULTS,
                bincode::serialize(&(job_id, metrics)).unwrap(),
            ),
            WireMessage::JobConcluded { job_id } => {
                (TAG_JOB_CONCLUDED, bincode::serialize(job_id).unwrap())
            }
        };
        let mut buf = Vec::with_capacity(1 + payload.len());
        buf.push(tag);
        buf.extend_from_slice(&payload);
        buf
    }

    pub fn decode(datagram: &[u8]) -> Result<WireMessage, WireDecodeError> {
        let (&tag, payload) = datagram
            .split_first()
            .ok_or(WireDecodeError::Empty)?;
        match tag {
            TAG_JOB_STARTED => {
                let job_id = bincode::deserialize(payload)?;
                Ok(WireMessage::JobStarted { job_id })
            }
            TAG_ERROR_ENCOUNTERED => {
                let (job_id, traceback) = bincode::deserialize(payload)?;
                Ok(WireMessage::ErrorEncountered { job_id, traceback })
            }
            TAG_JOB_SENT_RESULTS => {
                let (job_id, metrics) = bincode::deserialize(payload)?;
                Ok(WireMessage::JobSentResults { job_id, metrics })
            }
            TAG_JOB_CONCLUDED => {
                let job_id = bincode::deserialize(payload)?;
                Ok(WireMessage::JobConcluded { job_id })
            }
            other => Err(WireDecodeError::UnknownTag(other)),
        }
    }
}

/// A malformed or unrecognized datagram. The caller logs and drops it; it
/// never changes any job's state.
#[derive(Debug)]
pub enum WireDecodeError {
    Empty,
    UnknownTag(u8),
    Malformed(bincode::Error),
}

impl From<bincode::Error> for WireDecodeError {
    fn from(e: bincode::Error) -> Self {
        WireDecodeError::Malformed(e)
    }
}

impl fmt::Display for WireDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireDecodeError::Empty => write!(f, "empty datagram"),
            WireDecodeError::UnknownTag(tag) => write!(f, "unrecognized message tag {tag}"),
            WireDecodeError::Malformed(e) => write!(f, "malformed payload: {e}"),
        }
    }
}

impl std::error::Error for WireDecodeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_started_round_trips() {
        let msg = WireMessage::JobStarted { job_id: 42 };
        let encoded = msg.encode();
        assert_eq!(encoded[0], TAG_JOB_STARTED);
        assert_eq!(WireMessage::decode(&encoded).unwrap(), msg);
    }

    #[test]
    fn job_sent_results_round_trips_with_metrics() {
        let mut metrics = BTreeMap::new();
        metrics.insert("loss".to_string(), 0.125);
        let msg = WireMessage::JobSentResults { job_id: 7, metrics };
        let encoded = msg.encode();
        assert_eq!(WireMessage::decode(&encoded).unwrap(), msg);
    }

    #[test]
    fn error_encountered_round_trips_with_traceback() {
        let msg = WireMessage::ErrorEncountered {
            job_id: 3,
            traceback: "panicked at 'oops'".to_string(),
        };
        assert_eq!(WireMessage::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn unknown_tag_is_reported_not_panicked() {
        let datagram = [9u8, 1, 2, 3];
        match WireMessage::decode(&datagram) {
            Err(WireDecodeError::UnknownTag(9)) => {}
            other => panic!("expected UnknownTag(9), got {other:?}"),
        }
    }

    #[test]
    fn empty_datagram_is_reported_not_panicked() {
        assert!(matches!(
            WireMessage::decode(&[]),
            Err(WireDecodeError::Empty)
        ));
    }
}
