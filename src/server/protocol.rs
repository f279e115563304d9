//! Line protocol
//!
//! Each request is one JSON object on one line, tagged by `cmd`:
//!
//! ```text
//! {"cmd":"open","package":"payroll","cursor":"c_low","args":[1000]}
//! {"cmd":"fetch","package":"payroll","cursor":"c_low","limit":10}
//! {"cmd":"update_current","package":"payroll","cursor":"c_low","set":{"sal":900}}
//! {"cmd":"commit"}
//! ```
//!
//! Each response is one JSON object on one line with `status` set to
//! `"success"` or `"error"`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::cursor::{CursorAttributes, CursorRow};
use crate::error::Result;
use crate::session::{Assignments, Selection, Session};
use crate::storage::{Tuple, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Request {
    Insert {
        relation: String,
        rows: Vec<Tuple>,
    },
    Update {
        relation: String,
        set: Assignments,
        #[serde(default)]
        filter: Option<String>,
        #[serde(default)]
        binds: IndexMap<String, Value>,
    },
    Delete {
        relation: String,
        #[serde(default)]
        filter: Option<String>,
        #[serde(default)]
        binds: IndexMap<String, Value>,
    },
    SelectInto {
        query: String,
        #[serde(default)]
        binds: IndexMap<String, Value>,
    },
    Open {
        package: String,
        cursor: String,
        #[serde(default)]
        args: Vec<Value>,
    },
    Fetch {
        package: String,
        cursor: String,
        #[serde(default)]
        limit: Option<usize>,
    },
    Close {
        package: String,
        cursor: String,
    },
    Attributes {
        package: String,
        cursor: String,
    },
    UpdateCurrent {
        package: String,
        cursor: String,
        set: Assignments,
    },
    DeleteCurrent {
        package: String,
        cursor: String,
    },
    GetVar {
        package: String,
        name: String,
    },
    SetVar {
        package: String,
        name: String,
        value: Value,
    },
    ResetPackage {
        package: String,
    },
    Savepoint {
        name: String,
    },
    RollbackTo {
        name: String,
    },
    Commit,
    Rollback,
}

/// A row keyed by column name
pub type JsonRow = IndexMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_rows: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<JsonRow>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<CursorAttributes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Response {
    pub fn success() -> Self {
        Self {
            status: "success",
            affected_rows: None,
            rows: None,
            value: None,
            attributes: None,
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error",
            message: Some(message.into()),
            ..Self::success()
        }
    }

    fn affected(rows: usize) -> Self {
        Self {
            affected_rows: Some(rows),
            ..Self::success()
        }
    }

    fn rows(rows: Vec<CursorRow>) -> Self {
        Self {
            rows: Some(rows.iter().map(json_row).collect()),
            ..Self::success()
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == "success"
    }

    pub fn to_line(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => json + "\n",
            Err(e) => format!(
                "{{\"status\":\"error\",\"message\":\"Serialization error: {}\"}}\n",
                e
            ),
        }
    }
}

fn json_row(row: &CursorRow) -> JsonRow {
    row.columns()
        .iter()
        .cloned()
        .zip(row.values().values().iter().cloned())
        .collect()
}

fn selection(filter: Option<String>, binds: &IndexMap<String, Value>) -> Result<Selection> {
    match filter {
        None => Ok(Selection::All),
        Some(text) => {
            let binds: Vec<(&str, Value)> =
                binds.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
            Selection::filter_with(&text, &binds)
        }
    }
}

/// Run one request against a session
pub fn handle_request(session: &mut Session, request: Request) -> Response {
    match dispatch(session, request) {
        Ok(response) => response,
        Err(e) => Response::error(e.to_string()),
    }
}

fn dispatch(session: &mut Session, request: Request) -> Result<Response> {
    let response = match request {
        Request::Insert { relation, rows } => Response::affected(session.insert(&relation, rows)?),
        Request::Update {
            relation,
            set,
            filter,
            binds,
        } => {
            let selection = selection(filter, &binds)?;
            Response::affected(session.update(&relation, set, selection)?)
        }
        Request::Delete {
            relation,
            filter,
            binds,
        } => {
            let selection = selection(filter, &binds)?;
            Response::affected(session.delete(&relation, selection)?)
        }
        Request::SelectInto { query, binds } => {
            let binds: Vec<(&str, Value)> =
                binds.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
            Response::rows(vec![session.select_into(&query, &binds)?])
        }
        Request::Open {
            package,
            cursor,
            args,
        } => {
            let id = session.package_cursor(&package, &cursor)?;
            session.open(id, &args)?;
            Response::success()
        }
        Request::Fetch {
            package,
            cursor,
            limit,
        } => {
            let id = session.package_cursor(&package, &cursor)?;
            let rows = match limit {
                Some(limit) => session.fetch_batch(id, limit)?,
                None => session.fetch(id)?.into_iter().collect(),
            };
            Response::rows(rows)
        }
        Request::Close { package, cursor } => {
            let id = session.package_cursor(&package, &cursor)?;
            session.close_cursor(id)?;
            Response::success()
        }
        Request::Attributes { package, cursor } => {
            let id = session.package_cursor(&package, &cursor)?;
            Response {
                attributes: Some(session.cursor_attributes(id)?),
                ..Response::success()
            }
        }
        Request::UpdateCurrent {
            package,
            cursor,
            set,
        } => {
            let id = session.package_cursor(&package, &cursor)?;
            Response::affected(session.update_current(id, set)?)
        }
        Request::DeleteCurrent { package, cursor } => {
            let id = session.package_cursor(&package, &cursor)?;
            Response::affected(session.delete_current(id)?)
        }
        Request::GetVar { package, name } => Response {
            value: Some(session.get_var(&package, &name)?),
            ..Response::success()
        },
        Request::SetVar {
            package,
            name,
            value,
        } => {
            session.set_var(&package, &name, value)?;
            Response::success()
        }
        Request::ResetPackage { package } => {
            session.reset_package(&package)?;
            Response::success()
        }
        Request::Savepoint { name } => {
            session.savepoint(&name)?;
            Response::success()
        }
        Request::RollbackTo { name } => {
            session.rollback_to_savepoint(&name)?;
            Response::success()
        }
        Request::Commit => {
            session.commit()?;
            Response::success()
        }
        Request::Rollback => {
            session.rollback()?;
            Response::success()
        }
    };
    Ok(response)
}
