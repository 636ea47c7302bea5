use crate::parser::{Command, CommandKind, CONFIRM_CODE_LEN};
use getrandom::getrandom;
use std::collections::BTreeMap;
use std::sync::Mutex;

pub const CONFIRMATION_TTL_SECS: i64 = 300;

const CODE_MAX_GENERATION_ATTEMPTS: u32 = 32;
const BASE36_ALPHABET: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

#[derive(Debug, thiserror::Error)]
pub enum ConfirmError {
    #[error("only destructive commands take a confirmation ticket, got `{0}`")]
    NotDestructive(CommandKind),
    #[error("failed to generate confirmation code randomness: {0}")]
    Randomness(String),
    #[error("failed to allocate a unique confirmation code after {attempts} attempts")]
    CodeSpaceExhausted { attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationTicket {
    pub code: String,
    pub user_id: String,
    pub command: Command,
    pub issued_at: i64,
    pub expires_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Confirmed(Command),
    NotFound,
    Expired,
}

/// Pending destructive commands awaiting a user-supplied code. Tickets are
/// single-use and keyed by (user, code); a code issued to one user never
/// resolves for another.
#[derive(Debug, Default)]
pub struct ConfirmationStore {
    tickets: Mutex<BTreeMap<(String, String), ConfirmationTicket>>,
}

impl ConfirmationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a ticket for the command and returns its code. Any live
    /// ticket the user already holds for the same target path is replaced;
    /// the user's expired tickets are purged on the way through.
    pub fn issue(&self, user_id: &str, command: Command, now: i64) -> Result<String, ConfirmError> {
        let target = command
            .target_path()
            .filter(|_| command.is_destructive())
            .ok_or_else(|| ConfirmError::NotDestructive(command.kind()))?
            .to_string();

        let mut tickets = lock_tickets(&self.tickets);
        tickets.retain(|(owner, _), ticket| {
            !(owner.as_str() == user_id
                && (ticket.expires_at < now
                    || ticket.command.target_path() == Some(target.as_str())))
        });

        for _ in 0..CODE_MAX_GENERATION_ATTEMPTS {
            let code = generate_code()?;
            if tickets.keys().any(|(_, live)| live == &code) {
                continue;
            }
            tickets.insert(
                (user_id.to_string(), code.clone()),
                ConfirmationTicket {
                    code: code.clone(),
                    user_id: user_id.to_string(),
                    command,
                    issued_at: now,
                    expires_at: now + CONFIRMATION_TTL_SECS,
                },
            );
            return Ok(code);
        }
        Err(ConfirmError::CodeSpaceExhausted {
            attempts: CODE_MAX_GENERATION_ATTEMPTS,
        })
    }

    /// Deletes the ticket on every hit: a successful match is consumed and
    /// an expired one is purged.
    pub fn resolve(&self, user_id: &str, code: &str, now: i64) -> Resolution {
        let key = (user_id.to_string(), code.to_ascii_uppercase());
        let mut tickets = lock_tickets(&self.tickets);
        match tickets.remove(&key) {
            None => Resolution::NotFound,
            Some(ticket) if now > ticket.expires_at => Resolution::Expired,
            Some(ticket) => Resolution::Confirmed(ticket.command),
        }
    }

    pub fn live_count(&self) -> usize {
        lock_tickets(&self.tickets).len()
    }
}

// Codes share the parser's confirm-reply shape: fixed length, alphanumeric,
// at least one digit so a plain word never matches.
fn generate_code() -> Result<String, ConfirmError> {
    for _ in 0..CODE_MAX_GENERATION_ATTEMPTS {
        let mut bytes = [0_u8; 8];
        getrandom(&mut bytes).map_err(|err| ConfirmError::Randomness(err.to_string()))?;
        let mut value = u64::from_le_bytes(bytes);
        let mut code = String::with_capacity(CONFIRM_CODE_LEN);
        for _ in 0..CONFIRM_CODE_LEN {
            code.push(BASE36_ALPHABET[(value % 36) as usize] as char);
            value /= 36;
        }
        if code.chars().any(|ch| ch.is_ascii_digit()) {
            return Ok(code);
        }
    }
    Err(ConfirmError::CodeSpaceExhausted {
        attempts: CODE_MAX_GENERATION_ATTEMPTS,
    })
}

fn lock_tickets(
    tickets: &Mutex<BTreeMap<(String, String), ConfirmationTicket>>,
) -> std::sync::MutexGuard<'_, BTreeMap<(String, String), ConfirmationTicket>> {
    match tickets.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
