//! Speculative piece picker
//!
//! Hands out the lowest piece index not yet attempted, tracking attempts
//! in a private speculative copy of the pieces-set. When the speculative
//! set runs dry it reconciles against the authoritative set: done means
//! exit (closing the pieces channel), otherwise the speculative set is
//! reseeded and the still-missing pieces go out again.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::download::pieces::PiecesSet;

pub async fn run(authoritative: Arc<PiecesSet>, out: mpsc::Sender<u32>) {
    info!("piece manager: started");
    let mut speculative = authoritative.snapshot();

    loop {
        match speculative.iter().position(|&attempted| !attempted) {
            Some(index) => {
                speculative[index] = true;
                if out.send(index as u32).await.is_err() {
                    return;
                }
            }
            None => {
                let done = authoritative.count();
                if done == authoritative.len() {
                    info!("piece manager: all pieces verified");
                    return;
                }
                speculative = authoritative.snapshot();
                debug!(
                    done,
                    total = authoritative.len(),
                    "piece manager: reseeded speculative set"
                );
            }
        }
    }
}
