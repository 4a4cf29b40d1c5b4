/// Case endpoints
///
/// Every handler is scoped to the authenticated caller. A case that exists but
/// belongs to someone else is reported exactly like a missing one (404).
///
/// # Endpoints
///
/// - `GET    /api/cases` - List own cases (`?completed=true|false`)
/// - `POST   /api/cases` - Create case
/// - `GET    /api/cases/search?q=` - Search client name, title and case number
/// - `GET    /api/cases/stats` - Dashboard counters
/// - `GET    /api/cases/upcoming/:days` - Open cases due within N days
/// - `GET    /api/cases/overdue` - Open cases past their due date
/// - `GET    /api/cases/:id` - Read case
/// - `PUT    /api/cases/:id` - Partial update
/// - `DELETE /api/cases/:id` - Delete case
/// - `POST   /api/cases/:id/complete` - Mark completed
/// - `POST   /api/cases/:id/reset-reminder` - Clear reminder flags
///
/// Due dates are accepted as `YYYY-MM-DD` or RFC 3339 and stored as the start
/// of their calendar day in the reminder time zone.

use crate::{
    app::AppState,
    error::{validation_details, ApiError, ApiResult, ValidationErrorDetail},
    routes::{ApiResponse, JsonBody},
};
use advocate_shared::auth::AuthContext;
use advocate_shared::calendar::Calendar;
use advocate_shared::models::{
    Attachment, Case, CaseFilter, CasePatch, CasePriority, CaseStats, CaseStatus, NewCase,
    StatsBounds,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

const MAX_TAG_LEN: usize = 50;
const MAX_ATTACHMENTS: usize = 20;
const MAX_ATTACHMENT_NAME_LEN: usize = 200;
const MAX_SEARCH_LEN: usize = 100;

/// Range used by `/upcoming/:days` when the path is not a positive number
const DEFAULT_UPCOMING_DAYS: i64 = 7;
const MAX_UPCOMING_DAYS: i64 = 365;

/// A case plus fields derived from today's date
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseView {
    #[serde(flatten)]
    pub case: Case,

    /// Calendar days until due; negative once passed
    pub days_until_due: i64,

    pub is_overdue: bool,
}

impl CaseView {
    pub fn new(case: Case, calendar: &Calendar, today: NaiveDate) -> Self {
        Self {
            days_until_due: case.days_until_due(calendar, today),
            is_overdue: case.is_overdue(calendar, today),
            case,
        }
    }
}

/// Attachment as sent by clients
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentInput {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub url: String,

    /// Kept when a client re-sends an existing attachment
    pub uploaded_at: Option<DateTime<Utc>>,
}

/// Create case request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateCaseRequest {
    #[serde(default)]
    #[validate(length(min = 2, max = 200, message = "Client name must be 2-200 characters"))]
    pub client_name: String,

    #[serde(default)]
    #[validate(length(min = 3, max = 300, message = "Case title must be 3-300 characters"))]
    pub case_title: String,

    #[serde(default)]
    #[validate(length(min = 10, max = 2000, message = "Description must be 10-2000 characters"))]
    pub description: String,

    /// `YYYY-MM-DD` or RFC 3339
    #[serde(default)]
    pub due_date: String,

    pub priority: Option<String>,

    pub status: Option<String>,

    #[validate(length(max = 1000, message = "Notes must be at most 1000 characters"))]
    pub notes: Option<String>,

    #[validate(length(max = 200, message = "Court must be at most 200 characters"))]
    pub court: Option<String>,

    #[validate(length(max = 100, message = "Case number must be at most 100 characters"))]
    pub case_number: Option<String>,

    #[serde(default)]
    pub attachments: Vec<AttachmentInput>,

    #[serde(default)]
    #[validate(length(max = 20, message = "At most 20 tags are allowed"))]
    pub tags: Vec<String>,
}

/// Update case request; absent fields are left unchanged
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCaseRequest {
    #[validate(length(min = 2, max = 200, message = "Client name must be 2-200 characters"))]
    pub client_name: Option<String>,

    #[validate(length(min = 3, max = 300, message = "Case title must be 3-300 characters"))]
    pub case_title: Option<String>,

    #[validate(length(min = 10, max = 2000, message = "Description must be 10-2000 characters"))]
    pub description: Option<String>,

    pub due_date: Option<String>,

    pub priority: Option<String>,

    pub status: Option<String>,

    #[validate(length(max = 1000, message = "Notes must be at most 1000 characters"))]
    pub notes: Option<String>,

    #[validate(length(max = 200, message = "Court must be at most 200 characters"))]
    pub court: Option<String>,

    #[validate(length(max = 100, message = "Case number must be at most 100 characters"))]
    pub case_number: Option<String>,

    pub attachments: Option<Vec<AttachmentInput>>,

    #[validate(length(max = 20, message = "At most 20 tags are allowed"))]
    pub tags: Option<Vec<String>>,

    pub completed: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub completed: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

/// Search response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub success: bool,
    pub count: usize,
    pub search_term: String,
    pub data: Vec<CaseView>,
}

/// Upcoming cases response
#[derive(Debug, Serialize)]
pub struct UpcomingResponse {
    pub success: bool,
    pub count: usize,
    pub days: i64,
    pub data: Vec<CaseView>,
}

#[derive(Debug, Serialize)]
pub struct DeletedCase {
    pub id: Uuid,
}

/// Validation failures collected across one request
#[derive(Debug, Default)]
struct Problems(Vec<ValidationErrorDetail>);

impl Problems {
    fn from_validator(result: Result<(), validator::ValidationErrors>) -> Self {
        match result {
            Ok(()) => Self::default(),
            Err(errors) => Self(validation_details(&errors)),
        }
    }

    fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.push(ValidationErrorDetail::new(field, message));
    }

    fn into_result(mut self) -> ApiResult<()> {
        if self.0.is_empty() {
            return Ok(());
        }
        self.0.sort_by(|a, b| a.field.cmp(&b.field));
        Err(ApiError::ValidationError(self.0))
    }
}

fn trim(value: &mut String) {
    if value.trim().len() != value.len() {
        *value = value.trim().to_string();
    }
}

fn trim_opt(value: &mut Option<String>) {
    if let Some(v) = value.as_mut() {
        trim(v);
    }
}

impl CreateCaseRequest {
    fn trimmed(mut self) -> Self {
        trim(&mut self.client_name);
        trim(&mut self.case_title);
        trim(&mut self.description);
        trim(&mut self.due_date);
        trim_opt(&mut self.notes);
        trim_opt(&mut self.court);
        trim_opt(&mut self.case_number);
        self
    }
}

impl UpdateCaseRequest {
    fn trimmed(mut self) -> Self {
        trim_opt(&mut self.client_name);
        trim_opt(&mut self.case_title);
        trim_opt(&mut self.description);
        trim_opt(&mut self.due_date);
        trim_opt(&mut self.notes);
        trim_opt(&mut self.court);
        trim_opt(&mut self.case_number);
        self
    }
}

fn parse_case_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| ApiError::case_not_found())
}

fn parse_due_date(state: &AppState, raw: &str, problems: &mut Problems) -> Option<NaiveDate> {
    if raw.is_empty() {
        problems.add("dueDate", "Due date is required");
        return None;
    }
    let date = state.calendar.parse_date(raw);
    if date.is_none() {
        problems.add("dueDate", "Invalid date format. Use YYYY-MM-DD");
    }
    date
}

fn parse_priority(raw: Option<&str>, problems: &mut Problems) -> Option<CasePriority> {
    match raw?.parse::<CasePriority>() {
        Ok(priority) => Some(priority),
        Err(_) => {
            problems.add("priority", "Priority must be one of low, medium, high, urgent");
            None
        }
    }
}

fn parse_status(raw: Option<&str>, problems: &mut Problems) -> Option<CaseStatus> {
    match raw?.parse::<CaseStatus>() {
        Ok(status) => Some(status),
        Err(_) => {
            problems.add(
                "status",
                "Status must be one of pending, in-progress, completed, cancelled",
            );
            None
        }
    }
}

fn check_tags(tags: &[String], problems: &mut Problems) {
    if tags.iter().any(|t| t.trim().chars().count() > MAX_TAG_LEN) {
        problems.add("tags", format!("Tags must be at most {} characters", MAX_TAG_LEN));
    }
}

fn convert_attachments(
    inputs: Vec<AttachmentInput>,
    now: DateTime<Utc>,
    problems: &mut Problems,
) -> Vec<Attachment> {
    if inputs.len() > MAX_ATTACHMENTS {
        problems.add(
            "attachments",
            format!("At most {} attachments are allowed", MAX_ATTACHMENTS),
        );
        return Vec::new();
    }

    let mut attachments = Vec::with_capacity(inputs.len());
    for input in inputs {
        let name = input.name.trim().to_string();
        let url = input.url.trim().to_string();

        if name.is_empty() || name.chars().count() > MAX_ATTACHMENT_NAME_LEN {
            problems.add("attachments", "Attachment name must be 1-200 characters");
            continue;
        }
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            problems.add("attachments", "Attachment url must be an http(s) URL");
            continue;
        }

        attachments.push(Attachment {
            name,
            url,
            uploaded_at: input.uploaded_at.unwrap_or(now),
        });
    }
    attachments
}

fn views(cases: Vec<Case>, state: &AppState) -> Vec<CaseView> {
    let today = state.today();
    cases
        .into_iter()
        .map(|case| CaseView::new(case, &state.calendar, today))
        .collect()
}

/// List own cases
///
/// # Endpoint
///
/// ```text
/// GET /api/cases?completed=false
/// Authorization: Bearer <id_token>
/// ```
///
/// Ordered by due date, earliest first.
pub async fn list_cases(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ApiResponse<Vec<CaseView>>>> {
    let completed = match query.completed.as_deref().map(str::trim) {
        None | Some("") => None,
        Some("true") => Some(true),
        Some("false") => Some(false),
        Some(_) => return Err(ApiError::invalid("completed", "completed must be true or false")),
    };

    let cases = state
        .store
        .list_cases(&auth.user_id, CaseFilter { completed })
        .await?;

    Ok(Json(ApiResponse::list(views(cases, &state))))
}

/// Create case
///
/// # Endpoint
///
/// ```text
/// POST /api/cases
/// Authorization: Bearer <id_token>
/// Content-Type: application/json
///
/// {
///   "clientName": "R. Sharma",
///   "caseTitle": "Sharma v. State",
///   "description": "Bail hearing before the sessions court",
///   "dueDate": "2026-03-12",
///   "priority": "high"
/// }
/// ```
///
/// # Errors
///
/// - `422 Unprocessable Entity`: Validation failed, including a due date
///   before today
pub async fn create_case(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    JsonBody(req): JsonBody<CreateCaseRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<CaseView>>)> {
    let req = req.trimmed();
    let now = state.clock.now();
    let today = state.today();

    let mut problems = Problems::from_validator(req.validate());
    let due = parse_due_date(&state, &req.due_date, &mut problems);
    if due.is_some_and(|d| d < today) {
        problems.add("dueDate", "Due date cannot be in the past");
    }
    let priority = parse_priority(req.priority.as_deref(), &mut problems);
    let status = parse_status(req.status.as_deref(), &mut problems);
    check_tags(&req.tags, &mut problems);
    let attachments = convert_attachments(req.attachments, now, &mut problems);
    problems.into_result()?;

    let Some(due) = due else {
        return Err(ApiError::invalid("dueDate", "Due date is required"));
    };

    let case = state
        .store
        .insert_case(
            NewCase {
                user_id: auth.user_id.clone(),
                client_name: req.client_name,
                case_title: req.case_title,
                description: req.description,
                due_date: state.calendar.start_of_day(due),
                priority: priority.unwrap_or_default(),
                status: status.unwrap_or_default(),
                notes: req.notes.unwrap_or_default(),
                court: req.court.unwrap_or_default(),
                case_number: req.case_number.unwrap_or_default(),
                attachments,
                tags: req.tags,
            },
            now,
        )
        .await?;

    tracing::info!(user_id = %auth.user_id, case_id = %case.id, due_date = %due, "Case created");

    Ok((
        StatusCode::CREATED,
        Json(
            ApiResponse::ok(CaseView::new(case, &state.calendar, today))
                .with_message("Case created successfully"),
        ),
    ))
}

/// Search own cases
///
/// Case-insensitive substring match on client name, case title and case
/// number.
///
/// # Errors
///
/// - `422 Unprocessable Entity`: `q` missing, blank or longer than 100 characters
pub async fn search_cases(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<SearchResponse>> {
    let term = query.q.as_deref().map(str::trim).unwrap_or_default();
    if term.is_empty() {
        return Err(ApiError::invalid("q", "Please provide a search term"));
    }
    if term.chars().count() > MAX_SEARCH_LEN {
        return Err(ApiError::invalid(
            "q",
            format!("Search term must be at most {} characters", MAX_SEARCH_LEN),
        ));
    }

    let cases = state.store.search_cases(&auth.user_id, term).await?;
    let data = views(cases, &state);

    Ok(Json(SearchResponse {
        success: true,
        count: data.len(),
        search_term: term.to_string(),
        data,
    }))
}

/// Dashboard counters for the caller
pub async fn case_stats(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<ApiResponse<CaseStats>>> {
    let bounds = StatsBounds::for_day(&state.calendar, state.today());
    let stats = state.store.case_stats(&auth.user_id, bounds).await?;
    Ok(Json(ApiResponse::ok(stats)))
}

/// Resolves the `:days` segment of `/upcoming/:days`
///
/// Anything that is not a number, and zero, falls back to seven days.
fn upcoming_days(raw: &str) -> ApiResult<i64> {
    let days = match raw.trim().parse::<i64>() {
        Ok(0) | Err(_) => DEFAULT_UPCOMING_DAYS,
        Ok(days) => days,
    };
    if !(1..=MAX_UPCOMING_DAYS).contains(&days) {
        return Err(ApiError::invalid(
            "days",
            format!("Days must be between 1 and {}", MAX_UPCOMING_DAYS),
        ));
    }
    Ok(days)
}

/// Open cases due from today through today + N days
pub async fn upcoming_cases(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(days): Path<String>,
) -> ApiResult<Json<UpcomingResponse>> {
    let days = upcoming_days(&days)?;
    let today = state.today();
    let start = state.calendar.start_of_day(today);
    let end = state.calendar.start_of_day(state.calendar.add_days(today, days));

    let cases = state
        .store
        .cases_due_between(&auth.user_id, start, end)
        .await?;
    let data = views(cases, &state);

    Ok(Json(UpcomingResponse {
        success: true,
        count: data.len(),
        days,
        data,
    }))
}

/// Open cases due before today, most recent first
pub async fn overdue_cases(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<ApiResponse<Vec<CaseView>>>> {
    let before = state.calendar.start_of_day(state.today());
    let cases = state.store.overdue_cases(&auth.user_id, before).await?;
    Ok(Json(ApiResponse::list(views(cases, &state))))
}

pub async fn get_case(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<CaseView>>> {
    let id = parse_case_id(&id)?;
    let case = state
        .store
        .find_case(id, &auth.user_id)
        .await?
        .ok_or_else(ApiError::case_not_found)?;

    Ok(Json(ApiResponse::ok(CaseView::new(
        case,
        &state.calendar,
        state.today(),
    ))))
}

/// Partial update
///
/// Moving the due date to another day clears the reminder flags so the new
/// date gets its own reminder. A new due date may not be before today; an
/// unchanged one is accepted even if it has already passed.
///
/// # Errors
///
/// - `404 Not Found`: No such case for the caller
/// - `422 Unprocessable Entity`: Validation failed or nothing to update
pub async fn update_case(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<UpdateCaseRequest>,
) -> ApiResult<Json<ApiResponse<CaseView>>> {
    let id = parse_case_id(&id)?;
    let req = req.trimmed();
    let now = state.clock.now();
    let today = state.today();

    let mut problems = Problems::from_validator(req.validate());
    let due = match req.due_date.as_deref() {
        Some(raw) => parse_due_date(&state, raw, &mut problems),
        None => None,
    };
    let priority = parse_priority(req.priority.as_deref(), &mut problems);
    let status = parse_status(req.status.as_deref(), &mut problems);
    if let Some(tags) = req.tags.as_deref() {
        check_tags(tags, &mut problems);
    }
    let attachments = req
        .attachments
        .map(|inputs| convert_attachments(inputs, now, &mut problems));
    problems.into_result()?;

    let patch = CasePatch {
        client_name: req.client_name,
        case_title: req.case_title,
        description: req.description,
        due_date: due.map(|d| state.calendar.start_of_day(d)),
        priority,
        status,
        notes: req.notes,
        court: req.court,
        case_number: req.case_number,
        attachments,
        tags: req.tags,
        completed: req.completed,
    };
    if patch.is_empty() {
        return Err(ApiError::invalid("body", "No fields to update"));
    }

    let existing = state
        .store
        .find_case(id, &auth.user_id)
        .await?
        .ok_or_else(ApiError::case_not_found)?;

    if let Some(due_date) = patch.due_date {
        if due_date != existing.due_date && state.calendar.date_of(due_date) < today {
            return Err(ApiError::invalid("dueDate", "Due date cannot be in the past"));
        }
    }

    let case = state
        .store
        .update_case(id, &auth.user_id, patch, now)
        .await?
        .ok_or_else(ApiError::case_not_found)?;

    if case.due_date != existing.due_date {
        tracing::info!(
            user_id = %auth.user_id,
            case_id = %id,
            due_date = %state.calendar.date_of(case.due_date),
            "Case rescheduled, reminder reset"
        );
    } else {
        tracing::info!(user_id = %auth.user_id, case_id = %id, "Case updated");
    }

    Ok(Json(
        ApiResponse::ok(CaseView::new(case, &state.calendar, today))
            .with_message("Case updated successfully"),
    ))
}

pub async fn delete_case(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<DeletedCase>>> {
    let id = parse_case_id(&id)?;
    if !state.store.delete_case(id, &auth.user_id).await? {
        return Err(ApiError::case_not_found());
    }

    tracing::info!(user_id = %auth.user_id, case_id = %id, "Case deleted");
    Ok(Json(
        ApiResponse::ok(DeletedCase { id }).with_message("Case deleted successfully"),
    ))
}

pub async fn complete_case(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<CaseView>>> {
    let id = parse_case_id(&id)?;
    let case = state
        .store
        .update_case(id, &auth.user_id, CasePatch::complete(), state.clock.now())
        .await?
        .ok_or_else(ApiError::case_not_found)?;

    tracing::info!(user_id = %auth.user_id, case_id = %id, "Case completed");
    Ok(Json(
        ApiResponse::ok(CaseView::new(case, &state.calendar, state.today()))
            .with_message("Case marked as completed"),
    ))
}

/// Clears the reminder flags so the next sweep may notify again
pub async fn reset_reminder(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<CaseView>>> {
    let id = parse_case_id(&id)?;
    let case = state
        .store
        .reset_reminder(id, &auth.user_id, state.clock.now())
        .await?
        .ok_or_else(ApiError::case_not_found)?;

    tracing::info!(user_id = %auth.user_id, case_id = %id, "Reminder reset");
    Ok(Json(
        ApiResponse::ok(CaseView::new(case, &state.calendar, state.today()))
            .with_message("Reminder reset successfully"),
    ))
}
