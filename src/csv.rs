use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::model::{Actor, AuditEntry, Role, Transaction, TxId};
use crate::service::Request;
use crate::workflow::Command;

/// Errors that can occur when reading or parsing csv rows
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open {path}: {source}")]
    Open { path: String, source: csv::Error },

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized command '{command}'")]
    UnrecognizedCommand { line: usize, command: String },

    #[error("line {line}: unrecognized role '{role}'")]
    UnrecognizedRole { line: usize, role: String },

    #[error("line {line}: {command} missing transaction id")]
    MissingTx { line: usize, command: String },

    #[error("line {line}: {command} missing payload")]
    MissingPayload { line: usize, command: String },
}

#[derive(Debug, Deserialize)]
struct InputRow {
    user: String,
    role: String,
    command: String,
    tx: Option<TxId>,
    payload: Option<String>,
}

#[derive(Debug, Serialize)]
struct TransactionRow<'a> {
    id: TxId,
    r#type: &'a str,
    status: String,
    created_by: &'a str,
    notes: String,
}

#[derive(Debug, Serialize)]
struct AuditRow<'a> {
    id: u64,
    user: &'a str,
    action: &'a str,
    tx: Option<TxId>,
    timestamp: String,
}

impl InputRow {
    fn into_request(self, line: usize) -> Result<Request, CsvError> {
        let role = self
            .role
            .parse::<Role>()
            .map_err(|_| CsvError::UnrecognizedRole {
                line,
                role: self.role.clone(),
            })?;

        let command = self.command.to_ascii_lowercase();
        let tx = || {
            self.tx.ok_or_else(|| CsvError::MissingTx {
                line,
                command: command.clone(),
            })
        };
        let payload = || {
            self.payload
                .clone()
                .filter(|payload| !payload.is_empty())
                .ok_or_else(|| CsvError::MissingPayload {
                    line,
                    command: command.clone(),
                })
        };

        let parsed = match command.as_str() {
            "create" => Command::Create {
                transaction_type: payload()?,
            },
            "edit" => Command::Edit {
                id: tx()?,
                transaction_type: payload()?,
            },
            "cancel" => Command::Cancel { id: tx()? },
            "approve" => Command::Approve { id: tx()? },
            "reject" => Command::Reject { id: tx()? },
            "note" => Command::AddNote {
                id: tx()?,
                note: payload()?,
            },
            _ => {
                return Err(CsvError::UnrecognizedCommand {
                    line,
                    command: self.command.clone(),
                });
            }
        };

        Ok(Request {
            actor: Actor::new(self.user.clone(), role),
            command: parsed,
        })
    }
}

/// Read workflow requests from a csv file with header
/// `user,role,command,tx,payload`
pub fn read_requests(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<Request, CsvError>>, CsvError> {
    let path = path.as_ref();
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| CsvError::Open {
            path: path.display().to_string(),
            source,
        })?;

    Ok(reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            row.into_request(line)
        }))
}

/// Write transactions in csv format, notes joined with `|`
pub fn write_transactions<'a>(
    writer: impl io::Write,
    transactions: impl IntoIterator<Item = &'a Transaction>,
) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(writer);

    for tx in transactions {
        writer.serialize(TransactionRow {
            id: tx.id,
            r#type: &tx.transaction_type,
            status: tx.status.to_string(),
            created_by: &tx.created_by,
            notes: tx.notes.join("|"),
        })?;
    }

    writer.flush()?;
    Ok(())
}

/// Write the audit ledger to a csv file
pub fn write_audit<'a>(
    path: impl AsRef<Path>,
    entries: impl IntoIterator<Item = &'a AuditEntry>,
) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(File::create(path)?);

    for entry in entries {
        writer.serialize(AuditRow {
            id: entry.id,
            user: &entry.username,
            action: &entry.action,
            tx: entry.transaction_id,
            timestamp: entry.timestamp.to_rfc3339(),
        })?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn read(content: &str) -> Vec<Result<Request, CsvError>> {
        let file = write_csv(content);
        read_requests(file.path()).unwrap().collect()
    }

    const HEADER: &str = "user,role,command,tx,payload\n";

    #[test]
    fn read_create() {
        let results = read(&format!("{HEADER}alice,maker,create,,Subscription\n"));
        assert_eq!(results.len(), 1);

        let request = results.into_iter().next().unwrap().unwrap();
        assert_eq!(request.actor, Actor::maker("alice"));
        assert_eq!(
            request.command,
            Command::Create {
                transaction_type: "Subscription".to_string()
            }
        );
    }

    #[test]
    fn read_note_with_commas_when_quoted() {
        let results = read(&format!(
            "{HEADER}bob,Checker,note,3,\"looks fine, approving\"\n"
        ));
        let request = results.into_iter().next().unwrap().unwrap();
        assert_eq!(
            request.command,
            Command::AddNote {
                id: 3,
                note: "looks fine, approving".to_string()
            }
        );
    }

    #[test]
    fn read_with_whitespace() {
        let results = read("user, role, command, tx, payload\nbob, checker, approve, 1,\n");
        assert_eq!(results.len(), 1);
        assert!(results[0].is_ok());
    }

    #[test]
    fn read_returns_error_for_unknown_command() {
        let results = read(&format!("{HEADER}alice,maker,destroy,1,\n"));
        let err = results[0].as_ref().unwrap_err();
        assert!(matches!(err, CsvError::UnrecognizedCommand { line: 2, .. }));
    }

    #[test]
    fn read_returns_error_for_unknown_role() {
        let results = read(&format!("{HEADER}alice,auditor,approve,1,\n"));
        let err = results[0].as_ref().unwrap_err();
        assert!(matches!(err, CsvError::UnrecognizedRole { line: 2, .. }));
    }

    #[test]
    fn read_returns_error_for_missing_tx_and_payload() {
        let results = read(&format!("{HEADER}bob,checker,approve,,\nalice,maker,edit,1,\n"));
        assert!(matches!(
            results[0].as_ref().unwrap_err(),
            CsvError::MissingTx { line: 2, .. }
        ));
        assert!(matches!(
            results[1].as_ref().unwrap_err(),
            CsvError::MissingPayload { line: 3, .. }
        ));
    }

    #[test]
    fn missing_file_is_an_open_error() {
        assert!(matches!(
            read_requests("does/not/exist.csv"),
            Err(CsvError::Open { .. })
        ));
    }

    #[test]
    fn write_transactions_joins_notes() {
        let mut tx = Transaction::new(1, "Redemption", "alice");
        tx.notes = vec!["first".to_string(), "second".to_string()];

        let mut out = Vec::new();
        write_transactions(&mut out, [&tx]).unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "id,type,status,created_by,notes");
        assert_eq!(lines[1], "1,Redemption,Pending,alice,first|second");
    }
}
