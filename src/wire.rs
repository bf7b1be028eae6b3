//! JSON-lines front end: one request object per line in, one response object
//! per line out.
//!
//! ```text
//! → {"op":"create_room","name":"Hall"}
//! ← {"ok":true,"data":{"id":"01HN…","created_at":"…","body":{"room":{"name":"Hall","notes":null}}}}
//! → {"op":"delete_room","id":"01HZ…"}
//! ← {"ok":false,"error":{"kind":"not_found","message":"not found: rooms 01HZ…"}}
//! ```

use std::io;
use std::sync::Arc;

use chrono::NaiveDate;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::engine::{
    BookingForm, ConflictReport, ContactForm, Engine, EngineError, FieldError, RoomForm, VisitForm,
    VisitKind, VisitReceipt, WeekendForm, WeekendSlot,
};
use crate::limits::MAX_LINE_LEN;
use crate::model::*;

const DEFAULT_WEEKENDS: usize = 8;

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    ListRooms,
    CreateRoom {
        #[serde(flatten)]
        form: RoomForm,
    },
    RenameRoom {
        id: Ulid,
        #[serde(flatten)]
        form: RoomForm,
    },
    DeleteRoom {
        id: Ulid,
    },
    CreateContact {
        kind: ContactKind,
        #[serde(flatten)]
        form: ContactForm,
    },
    UpdateContact {
        kind: ContactKind,
        id: Ulid,
        #[serde(flatten)]
        form: ContactForm,
    },
    ListContacts {
        kind: ContactKind,
        #[serde(default)]
        include_inactive: bool,
    },
    DeactivateContact {
        kind: ContactKind,
        id: Ulid,
    },
    SubmitBooking(BookingForm),
    SubmitContractorVisit(VisitForm),
    SubmitGuestVisit(VisitForm),
    DeleteReservation {
        table: Table,
        id: Ulid,
    },
    Calendar {
        table: Table,
        year: i32,
        month: u32,
        room_id: Option<Ulid>,
    },
    Series {
        table: Table,
        series_id: Ulid,
    },
    AssignWeekend(WeekendForm),
    UnassignWeekend {
        id: Ulid,
    },
    Weekends {
        from: Option<NaiveDate>,
        count: Option<usize>,
    },
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Data {
    Records(Vec<Record>),
    Record(Record),
    Visit(VisitReceipt),
    Removed { removed: usize },
    Weekends(Vec<WeekendSlot>),
}

#[derive(Debug, Serialize)]
struct ConflictBody<'a> {
    #[serde(flatten)]
    report: &'a ConflictReport,
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    kind: &'static str,
    message: String,
    #[serde(skip_serializing_if = "no_fields")]
    fields: &'a [FieldError],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    conflicts: Vec<ConflictBody<'a>>,
}

fn no_fields(fields: &&[FieldError]) -> bool {
    fields.is_empty()
}

impl<'a> ErrorBody<'a> {
    fn from_engine(e: &'a EngineError) -> Self {
        let fields: &[FieldError] = match e {
            EngineError::Validation(fields) => fields.as_slice(),
            _ => &[],
        };
        let conflicts = match e {
            EngineError::Conflict(reports) => reports
                .iter()
                .map(|report| ConflictBody {
                    message: report.to_string(),
                    report,
                })
                .collect(),
            _ => Vec::new(),
        };
        Self {
            kind: e.kind(),
            message: e.to_string(),
            fields,
            conflicts,
        }
    }

    fn bad_request(message: String) -> Self {
        Self {
            kind: "bad_request",
            message,
            fields: &[],
            conflicts: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize)]
struct Response<'a> {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Data>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody<'a>>,
}

#[derive(Debug)]
pub enum WireError {
    Io(io::Error),
    Encode(serde_json::Error),
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::Io(e) => write!(f, "connection I/O error: {e}"),
            WireError::Encode(e) => write!(f, "could not encode response: {e}"),
        }
    }
}

impl std::error::Error for WireError {}

impl From<io::Error> for WireError {
    fn from(e: io::Error) -> Self {
        WireError::Io(e)
    }
}

impl From<serde_json::Error> for WireError {
    fn from(e: serde_json::Error) -> Self {
        WireError::Encode(e)
    }
}

impl From<LinesCodecError> for WireError {
    fn from(e: LinesCodecError) -> Self {
        match e {
            LinesCodecError::Io(e) => WireError::Io(e),
            LinesCodecError::MaxLineLengthExceeded => {
                WireError::Io(io::Error::new(io::ErrorKind::InvalidData, "line too long"))
            }
        }
    }
}

/// Run one request against the engine. `Ok(None)` means success with nothing
/// to return.
pub async fn execute(engine: &Engine, req: Request) -> Result<Option<Data>, EngineError> {
    let data = match req {
        Request::ListRooms => Data::Records(engine.rooms().await?),
        Request::CreateRoom { form } => Data::Record(engine.create_room(&form).await?),
        Request::RenameRoom { id, form } => Data::Record(engine.rename_room(id, &form).await?),
        Request::DeleteRoom { id } => {
            engine.delete_room(id).await?;
            return Ok(None);
        }
        Request::CreateContact { kind, form } => Data::Record(engine.create_contact(kind, &form).await?),
        Request::UpdateContact { kind, id, form } => {
            Data::Record(engine.update_contact(kind, id, &form).await?)
        }
        Request::ListContacts { kind, include_inactive } => {
            Data::Records(engine.contacts(kind, include_inactive).await?)
        }
        Request::DeactivateContact { kind, id } => {
            Data::Record(engine.set_contact_active(kind, id, false).await?)
        }
        Request::SubmitBooking(form) => Data::Records(engine.submit_booking(&form).await?),
        Request::SubmitContractorVisit(form) => {
            Data::Visit(engine.submit_visit(VisitKind::Contractor, &form).await?)
        }
        Request::SubmitGuestVisit(form) => Data::Visit(engine.submit_visit(VisitKind::Guest, &form).await?),
        Request::DeleteReservation { table, id } => Data::Removed {
            removed: engine.delete_reservation(table, id).await?,
        },
        Request::Calendar {
            table,
            year,
            month,
            room_id,
        } => Data::Records(engine.calendar(table, year, month, room_id).await?),
        Request::Series { table, series_id } => Data::Records(engine.series(table, series_id).await?),
        Request::AssignWeekend(form) => Data::Record(engine.assign_weekend(&form).await?),
        Request::UnassignWeekend { id } => {
            engine.unassign_weekend(id).await?;
            return Ok(None);
        }
        Request::Weekends { from, count } => {
            let from = from.unwrap_or_else(|| engine.today());
            Data::Weekends(
                engine
                    .upcoming_weekends(from, count.unwrap_or(DEFAULT_WEEKENDS))
                    .await?,
            )
        }
    };
    Ok(Some(data))
}

/// Decode, execute and encode one request line.
async fn handle_line(engine: &Engine, line: &str) -> Result<String, serde_json::Error> {
    let req: Request = match serde_json::from_str(line) {
        Ok(req) => req,
        Err(e) => {
            debug!("bad request: {e}");
            return serde_json::to_string(&Response {
                ok: false,
                data: None,
                error: Some(ErrorBody::bad_request(e.to_string())),
            });
        }
    };

    let op = crate::observability::op_label(&req);
    let started = std::time::Instant::now();
    let result = execute(engine, req).await;
    let status = match &result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    metrics::counter!(crate::observability::REQUESTS_TOTAL, "op" => op, "status" => status).increment(1);
    metrics::histogram!(crate::observability::REQUEST_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());

    match result {
        Ok(data) => serde_json::to_string(&Response {
            ok: true,
            data,
            error: None,
        }),
        Err(e) => serde_json::to_string(&Response {
            ok: false,
            data: None,
            error: Some(ErrorBody::from_engine(&e)),
        }),
    }
}

/// Serve one client until it disconnects.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>) -> Result<(), WireError> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    while let Some(frame) = framed.next().await {
        let reply = match frame {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => handle_line(&engine, &line).await?,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                warn!("request longer than {MAX_LINE_LEN} bytes dropped");
                serde_json::to_string(&Response {
                    ok: false,
                    data: None,
                    error: Some(ErrorBody::bad_request(format!(
                        "request longer than {MAX_LINE_LEN} bytes"
                    ))),
                })?
            }
            Err(e) => return Err(e.into()),
        };
        framed.send(reply).await?;
    }
    Ok(())
}
