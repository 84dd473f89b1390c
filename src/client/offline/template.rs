//! Payload templates
//!
//! String fields of an operation payload may contain `{{name}}` placeholders
//! that are filled in at enqueue time from a fixed set of variables:
//!
//! | variable | value |
//! |---|---|
//! | `operation_id` | id of the operation being enqueued |
//! | `user_id` | user the operation runs for (empty when unknown) |
//! | `timestamp` | enqueue time, RFC 3339 |
//! | `job_id` | originating analysis job (empty when none) |
//! | `kind` | operation kind, e.g. `user_data` |
//!
//! Rendering is a single left-to-right pass. Substituted text is copied
//! verbatim and never scanned again.

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::shared::operation::{OperationKind, SyncPayload};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unknown template variable '{0}'")]
    UnknownVariable(String),

    #[error("unterminated placeholder at byte {0}")]
    Unterminated(usize),
}

/// Variables available to a template
#[derive(Debug, Clone)]
pub struct TemplateContext {
    pub operation_id: Uuid,
    pub user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub job_id: Option<Uuid>,
    pub kind: OperationKind,
}

impl TemplateContext {
    fn lookup(&self, name: &str) -> Result<String, TemplateError> {
        let value = match name {
            "operation_id" => self.operation_id.to_string(),
            "user_id" => self.user_id.clone().unwrap_or_default(),
            "timestamp" => self.timestamp.to_rfc3339(),
            "job_id" => self.job_id.map(|id| id.to_string()).unwrap_or_default(),
            "kind" => self.kind.as_str().to_string(),
            other => return Err(TemplateError::UnknownVariable(other.to_string())),
        };
        Ok(value)
    }

    /// Render one string
    pub fn render_str(&self, template: &str) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        let mut offset = 0;

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after_open = &rest[start + 2..];
            let end = after_open
                .find("}}")
                .ok_or(TemplateError::Unterminated(offset + start))?;
            let name = after_open[..end].trim();
            out.push_str(&self.lookup(name)?);

            let consumed = start + 2 + end + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }

        out.push_str(rest);
        Ok(out)
    }

    /// Render every string leaf of a JSON value; keys are left alone
    pub fn render_value(&self, value: &Value) -> Result<Value, TemplateError> {
        Ok(match value {
            Value::String(s) => Value::String(self.render_str(s)?),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.render_value(item))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => {
                let mut rendered = serde_json::Map::with_capacity(map.len());
                for (key, item) in map {
                    rendered.insert(key.clone(), self.render_value(item)?);
                }
                Value::Object(rendered)
            }
            other => other.clone(),
        })
    }

    /// Render the free-form fields of a payload
    ///
    /// Identifiers that select the target resource are not templated.
    pub fn render_payload(&self, payload: &SyncPayload) -> Result<SyncPayload, TemplateError> {
        Ok(match payload {
            SyncPayload::Analysis(a) => {
                let mut a = a.clone();
                a.result = self.render_value(&a.result)?;
                SyncPayload::Analysis(a)
            }
            SyncPayload::UserData(u) => {
                let mut u = u.clone();
                u.fields = self.render_value(&u.fields)?;
                SyncPayload::UserData(u)
            }
            SyncPayload::Notification(n) => {
                let mut n = n.clone();
                n.title = self.render_str(&n.title)?;
                n.body = self.render_str(&n.body)?;
                SyncPayload::Notification(n)
            }
            SyncPayload::Preference(p) => {
                let mut p = p.clone();
                p.value = self.render_value(&p.value)?;
                SyncPayload::Preference(p)
            }
        })
    }
}
