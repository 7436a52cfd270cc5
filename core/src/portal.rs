//! Request lifecycle operations, independent of any HTTP framework.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono_tz::Tz;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use crate::access::{authorized_api_ids, is_authorized};
use crate::models::{ApiDefinition, ApiId, Request, RequestId, RequestStatus, RequestView, User};
use crate::queue::{JobDescriptor, JobQueue, QueueError};
use crate::results::{LogStream, ResultsError, WorkDir};
use crate::store::{Store, StoreError};
use crate::time::as_local_string;

pub const REQUIRED: &str = "This field is required.";
pub const INVALID_CHOICE: &str = "Select a valid choice. That choice is not one of the available choices.";

/// Field name to messages, the way a form reports them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }
}

#[derive(Debug, Error)]
pub enum PortalError {
    #[error("invalid submission")]
    Validation(FieldErrors),
    #[error("{0}")]
    NotFound(String),
    #[error("request {0} has not finished yet")]
    NotReady(RequestId),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Results(ResultsError),
}

impl From<ResultsError> for PortalError {
    fn from(err: ResultsError) -> Self {
        match err {
            ResultsError::MissingOutput(_) | ResultsError::MissingLog(_) => PortalError::NotFound(err.to_string()),
            other => PortalError::Results(other),
        }
    }
}

/// Raw submission as it arrives from the caller.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub api_id: Option<ApiId>,
    pub input_params: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiChoice {
    pub id: ApiId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Description {
    pub description: String,
}

#[derive(Clone)]
pub struct Portal {
    store: Arc<dyn Store>,
    queue: Arc<dyn JobQueue>,
    workdir: WorkDir,
    zone: Tz,
}

impl Portal {
    pub fn new(store: Arc<dyn Store>, queue: Arc<dyn JobQueue>, workdir: WorkDir, zone: Tz) -> Self {
        Self { store, queue, workdir, zone }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// APIs the caller may pick from, ordered by id. Anonymous callers are
    /// only in the guest group.
    pub async fn choices(&self, user: Option<&User>) -> Result<Vec<ApiChoice>, PortalError> {
        let apis = self.store.list_apis().await?;
        let groups: &[String] = user.map(|u| u.groups.as_slice()).unwrap_or_default();
        let allowed = authorized_api_ids(groups, &apis);
        Ok(apis
            .into_iter()
            .filter(|api| allowed.contains(&api.id))
            .map(|api| ApiChoice { id: api.id, name: api.name })
            .collect())
    }

    /// Validates, stores the request as processing and hands it to the queue.
    pub async fn submit(&self, user: &User, submission: Submission) -> Result<Request, PortalError> {
        let mut errors = FieldErrors::default();

        let api = match submission.api_id {
            None => {
                errors.add("api_id", REQUIRED);
                None
            }
            Some(id) => match self.store.get_api(id).await? {
                Some(api) if is_authorized(&user.groups, &api) => Some(api),
                _ => {
                    errors.add("api_id", INVALID_CHOICE);
                    None
                }
            },
        };

        if let Some(api) = &api {
            let given = submission.input_params.len();
            if given != api.num_input_params as usize {
                errors.add(
                    "input_params",
                    format!("{} requires {} input parameters, {} given.", api.name, api.num_input_params, given),
                );
            }
        }

        let api = match api {
            Some(api) if errors.is_empty() => api,
            _ => return Err(PortalError::Validation(errors)),
        };

        let request = self
            .store
            .create_request(user.id, api.id, &submission.input_params, RequestStatus::Processing)
            .await?;

        let job = JobDescriptor {
            id: request.id,
            command: api.command.clone(),
            input_params: request.input_params.clone(),
            num_required_input_params: api.num_input_params,
        };
        if let Err(e) = self.queue.enqueue(job).await {
            error!(request_id = request.id, "Could not enqueue job: {}", e);
            self.store.set_request_status(request.id, RequestStatus::Failed).await?;
            return Err(e.into());
        }

        info!(request_id = request.id, user = %user.username, api = %api.name, "Request submitted");
        Ok(request)
    }

    /// The caller's own requests. Anonymous callers get nothing.
    pub async fn list_requests(&self, user: Option<&User>) -> Result<Vec<RequestView>, PortalError> {
        let Some(user) = user else {
            return Ok(Vec::new());
        };

        let names: HashMap<ApiId, String> =
            self.store.list_apis().await?.into_iter().map(|api| (api.id, api.name)).collect();

        let views = self
            .store
            .list_requests_for(user.id)
            .await?
            .into_iter()
            .map(|req| RequestView {
                request_id: req.id,
                api_name: names.get(&req.api_id).cloned().unwrap_or_default(),
                input_params: req.input_params.join(" "),
                date_added: as_local_string(req.date_added, self.zone),
                status: req.status.label().to_string(),
            })
            .collect();
        Ok(views)
    }

    /// Builds `results.zip` for a finished request owned by `user`.
    pub async fn package_results(&self, user: &User, request_id: RequestId) -> Result<Vec<u8>, PortalError> {
        let request = self.owned_request(user, request_id).await?;
        if !request.status.is_terminal() || !self.workdir.is_published(request.id).await {
            return Err(PortalError::NotReady(request.id));
        }
        let api = self
            .store
            .get_api(request.api_id)
            .await?
            .ok_or_else(|| PortalError::NotFound(format!("API {} not found", request.api_id)))?;

        Ok(self.workdir.package(request.id, &api.output_files).await?)
    }

    pub async fn read_log(&self, user: &User, request_id: RequestId, stream: LogStream) -> Result<Vec<u8>, PortalError> {
        let request = self.owned_request(user, request_id).await?;
        Ok(self.workdir.read_log(request.id, stream).await?)
    }

    /// Never fails on a bad id; unknown APIs have an empty description.
    pub async fn describe(&self, api_id: Option<ApiId>) -> Description {
        let description = match api_id {
            Some(id) => match self.store.get_api(id).await {
                Ok(Some(ApiDefinition { description, .. })) => description,
                Ok(None) => String::new(),
                Err(e) => {
                    error!(api_id = id, "Description lookup failed: {}", e);
                    String::new()
                }
            },
            None => String::new(),
        };
        Description { description }
    }

    // Foreign requests look exactly like missing ones.
    async fn owned_request(&self, user: &User, request_id: RequestId) -> Result<Request, PortalError> {
        match self.store.get_request(request_id).await? {
            Some(request) if request.owner == user.id => Ok(request),
            _ => Err(PortalError::NotFound(format!("Request {request_id} not found"))),
        }
    }
}
