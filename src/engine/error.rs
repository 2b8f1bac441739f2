use std::collections::BTreeMap;

use serde::Serialize;
use ulid::Ulid;

/// Form field an error is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    ClassroomId,
    UserId,
    Date,
    StartTime,
    EndTime,
    UtcOffset,
    RepeatOnWeeks,
    StartDate,
    EndDate,
    Course,
    Description,
    Name,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::ClassroomId => "classroomId",
            Field::UserId => "userId",
            Field::Date => "date",
            Field::StartTime => "startTime",
            Field::EndTime => "endTime",
            Field::UtcOffset => "utcOffset",
            Field::RepeatOnWeeks => "repeatOnWeeks",
            Field::StartDate => "startDate",
            Field::EndDate => "endDate",
            Field::Course => "course",
            Field::Description => "description",
            Field::Name => "name",
        }
    }
}

/// Field → message, ordered by field. The first message recorded for a field wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<Field, String>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: Field, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.insert(field, message);
        errors
    }

    pub fn insert(&mut self, field: Field, message: impl Into<String>) {
        self.0.entry(field).or_insert_with(|| message.into());
    }

    pub fn extend(&mut self, other: FieldErrors) {
        for (field, message) in other.0 {
            self.insert(field, message);
        }
    }

    pub fn get(&self, field: Field) -> Option<&str> {
        self.0.get(&field).map(String::as_str)
    }

    pub fn contains(&self, field: Field) -> bool {
        self.0.contains_key(&field)
    }

    pub fn fields(&self) -> impl Iterator<Item = Field> + '_ {
        self.0.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `{"startTime":"..."}`, the shape form clients attach to fields.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".into())
    }

    /// `Ok(())` when empty, otherwise a validation error carrying these fields.
    pub fn into_validation(self) -> Result<(), EngineError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Validation(self))
        }
    }
}

impl std::fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, (field, message)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}: {message}", field.as_str())?;
        }
        Ok(())
    }
}

/// Discriminant of an [`EngineError`], stable across messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    AlreadyExists,
    HasReservations,
    LimitExceeded,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "notFound",
            ErrorKind::AlreadyExists => "alreadyExists",
            ErrorKind::HasReservations => "hasReservations",
            ErrorKind::LimitExceeded => "limitExceeded",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    Validation(FieldErrors),
    /// Names the implicated fields, never the conflicting record.
    Conflict(FieldErrors),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    HasReservations(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub fn validation(field: Field, message: impl Into<String>) -> Self {
        EngineError::Validation(FieldErrors::single(field, message))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::Conflict(_) => ErrorKind::Conflict,
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            EngineError::HasReservations(_) => ErrorKind::HasReservations,
            EngineError::LimitExceeded(_) => ErrorKind::LimitExceeded,
            EngineError::WalError(_) => ErrorKind::Internal,
        }
    }

    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            EngineError::Validation(errors) | EngineError::Conflict(errors) => Some(errors),
            _ => None,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(errors) => write!(f, "validation failed: {errors}"),
            EngineError::Conflict(errors) => write!(f, "conflict: {errors}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::HasReservations(id) => {
                write!(f, "cannot delete classroom {id}: has reservations")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_message_per_field_wins() {
        let mut errors = FieldErrors::new();
        errors.insert(Field::StartTime, "first");
        errors.insert(Field::StartTime, "second");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.get(Field::StartTime), Some("first"));
    }

    #[test]
    fn field_errors_serialize_with_form_names() {
        let mut errors = FieldErrors::new();
        errors.insert(Field::EndTime, "overlaps");
        errors.insert(Field::StartTime, "overlaps");
        assert_eq!(
            errors.to_json(),
            r#"{"startTime":"overlaps","endTime":"overlaps"}"#
        );
    }

    #[test]
    fn display_lists_fields_in_order() {
        let mut errors = FieldErrors::new();
        errors.insert(Field::EndDate, "b");
        errors.insert(Field::StartDate, "a");
        let err = EngineError::Conflict(errors);
        assert_eq!(err.to_string(), "conflict: startDate: a; endDate: b");
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.kind().as_str(), "conflict");
    }

    #[test]
    fn empty_errors_validate_ok() {
        assert!(FieldErrors::new().into_validation().is_ok());
        let err = FieldErrors::single(Field::Course, "required")
            .into_validation()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.field_errors().unwrap().contains(Field::Course));
        assert!(EngineError::NotFound(Ulid::new()).field_errors().is_none());
    }
}
