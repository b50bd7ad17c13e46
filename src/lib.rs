pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod judge;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod storage;
pub mod utils;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use sqlx::PgPool;

use crate::judge::{Executor, ProcessExecutor, RemoteExecutor};
use crate::services::{
    answer_service::AnswerService, attempt_service::AttemptService, finalize_service::FinalizeService,
    judge_service::JudgeService, session_service::SessionService,
};
use crate::storage::{PgStore, Store};

#[derive(Clone)]
pub struct AppState {
    pub session_service: SessionService,
    pub attempt_service: AttemptService,
    pub answer_service: AnswerService,
    pub judge_service: JudgeService,
    pub finalize_service: FinalizeService,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, executor: Arc<dyn Executor>, judge_timeout: Duration) -> Self {
        Self {
            session_service: SessionService::new(store.clone()),
            attempt_service: AttemptService::new(store.clone()),
            answer_service: AnswerService::new(store.clone()),
            judge_service: JudgeService::new(store.clone(), executor, judge_timeout),
            finalize_service: FinalizeService::new(store),
        }
    }

    /// Postgres-backed state. Uses the remote judge when `JUDGE_URL` is set,
    /// local interpreters otherwise.
    pub fn from_config(pool: PgPool) -> error::Result<Self> {
        let config = config::get_config();
        let executor: Arc<dyn Executor> = match &config.judge_url {
            Some(url) => {
                let http_client = Client::builder()
                    .timeout(Duration::from_secs(60))
                    .build()?;
                tracing::info!(judge_url = %url, "using remote judge");
                Arc::new(RemoteExecutor::new(url.clone(), http_client))
            }
            None => {
                tracing::info!(python = %config.python_bin, node = %config.node_bin, "using local interpreters for judging");
                Arc::new(ProcessExecutor::new(config.python_bin.clone(), config.node_bin.clone()))
            }
        };
        Ok(Self::new(Arc::new(PgStore::new(pool)), executor, config.judge_timeout()))
    }
}
