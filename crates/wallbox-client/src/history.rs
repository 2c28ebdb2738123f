use tracing::{debug, info};

use types::SessionLogEntry;
use udp_transport::Exchange;

use crate::{ClientError, WallboxClient};

pub const FIRST_HISTORY_SLOT: u16 = 100;
pub const LAST_HISTORY_SLOT: u16 = 130;

/// Walks the history slots and keeps every real session once.
///
/// A negative session id ends the walk, a zero id is an empty slot, and a slot
/// repeating the previously accepted session is skipped. Only the immediately
/// preceding entry is compared; non-adjacent repeats are kept.
pub(crate) async fn collect<E: Exchange>(
    client: &WallboxClient<E>,
) -> Result<Vec<SessionLogEntry>, ClientError> {
    let capacity = usize::from(LAST_HISTORY_SLOT - FIRST_HISTORY_SLOT + 1);
    let mut history: Vec<SessionLogEntry> = Vec::with_capacity(capacity);

    for slot in FIRST_HISTORY_SLOT..=LAST_HISTORY_SLOT {
        let entry: SessionLogEntry = client.report(&format!("report {slot}")).await?;

        if entry.session < 0 {
            debug!(slot, "end of history");
            break;
        }
        if entry.session == 0 {
            continue;
        }
        if history
            .last()
            .is_some_and(|last| last.session == entry.session)
        {
            debug!(slot, session = entry.session, "duplicate history slot");
            continue;
        }

        history.push(entry);
    }

    info!(sessions = history.len(), "history collected");
    Ok(history)
}
