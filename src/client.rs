//! [`CommandContext`] backed by the LSP client.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_lsp::lsp_types::notification::{Notification, Progress};
use tower_lsp::lsp_types::request::{ApplyWorkspaceEdit, WorkDoneProgressCreate};
use tower_lsp::lsp_types::{
    ApplyWorkspaceEditParams, Location, NumberOrString, Position, ProgressParams,
    ProgressParamsValue, Url, WorkDoneProgress, WorkDoneProgressBegin,
    WorkDoneProgressCreateParams, WorkDoneProgressEnd, WorkDoneProgressReport, WorkspaceEdit,
};
use tower_lsp::Client;

use crate::service::CommandContext;

static NEXT_PROGRESS: AtomicU64 = AtomicU64::new(0);

/// `embedls/showReferences`: asks the editor to peek a list of locations.
#[derive(Debug)]
pub enum ShowReferences {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowReferencesParams {
    pub uri: Url,
    pub position: Position,
    pub references: Vec<Location>,
}

impl Notification for ShowReferences {
    type Params = ShowReferencesParams;
    const METHOD: &'static str = "embedls/showReferences";
}

/// Context for one `workspace/executeCommand` request.
pub(crate) struct ClientCommandContext {
    client: Client,
    progress: Mutex<Option<NumberOrString>>,
}

impl ClientCommandContext {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            progress: Mutex::new(None),
        }
    }

    async fn notify(&self, token: NumberOrString, progress: WorkDoneProgress) {
        self.client
            .send_notification::<Progress>(ProgressParams {
                token,
                value: ProgressParamsValue::WorkDone(progress),
            })
            .await;
    }
}

#[tower_lsp::async_trait]
impl CommandContext for ClientCommandContext {
    async fn begin_progress(&self, title: String, message: Option<String>, percentage: Option<u32>) {
        let id = NEXT_PROGRESS.fetch_add(1, Ordering::Relaxed);
        let token = NumberOrString::String(format!("embedls/{id}"));
        let created = self
            .client
            .send_request::<WorkDoneProgressCreate>(WorkDoneProgressCreateParams {
                token: token.clone(),
            })
            .await;
        if let Err(error) = created {
            tracing::debug!(%error, "client refused progress");
            return;
        }

        *self.progress.lock().await = Some(token.clone());
        let begin = WorkDoneProgressBegin {
            title,
            cancellable: Some(false),
            message,
            percentage,
        };
        self.notify(token, WorkDoneProgress::Begin(begin)).await;
    }

    async fn report_progress(&self, message: Option<String>, percentage: Option<u32>) {
        let Some(token) = self.progress.lock().await.clone() else {
            return;
        };
        let report = WorkDoneProgressReport {
            cancellable: Some(false),
            message,
            percentage,
        };
        self.notify(token, WorkDoneProgress::Report(report)).await;
    }

    async fn end_progress(&self, message: Option<String>) {
        let Some(token) = self.progress.lock().await.take() else {
            return;
        };
        self.notify(token, WorkDoneProgress::End(WorkDoneProgressEnd { message }))
            .await;
    }

    async fn show_references(&self, uri: Url, position: Position, references: Vec<Location>) {
        self.client
            .send_notification::<ShowReferences>(ShowReferencesParams {
                uri,
                position,
                references,
            })
            .await;
    }

    async fn apply_edit(&self, label: Option<String>, edit: WorkspaceEdit) -> bool {
        match self
            .client
            .send_request::<ApplyWorkspaceEdit>(ApplyWorkspaceEditParams { label, edit })
            .await
        {
            Ok(response) => response.applied,
            Err(error) => {
                tracing::warn!(%error, "workspace/applyEdit failed");
                false
            }
        }
    }
}
