use std::sync::Arc;

use crate::error::{ConfigurationError, Error};
use crate::net::Connection;
use crate::pipeline::{PipelineBuilder, PipelineConfiguration, PipelineContext, RecoverablePhase};
use crate::resilience::RetryBudget;
use crate::sso::phases::{
    ClearCredentials, EstablishKeyExchange, InterpretServerChallenge, LogLoginOutcome, LoginContext, PasswordLogin,
    RegisterSession, ResumeSession, SsoServices, CREDENTIALS,
};
use crate::sso::session::SessionData;

type LoginPipeline = PipelineConfiguration<LoginContext, Error, (), SessionData>;

/// A completed login and the failures it recovered from along the way.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub session: SessionData,
    /// Failures superseded by a fallback or a credential rewind, oldest
    /// first.
    pub recovered: Vec<Error>,
}

/// Authenticates a freshly opened connection.
///
/// The login graph is built once; each call to [`login`](Self::login) runs
/// it against a new context.
pub struct SsoProcessor {
    services: Arc<SsoServices>,
    pipeline: LoginPipeline,
}

impl SsoProcessor {
    pub fn new(services: SsoServices) -> Result<Self, ConfigurationError> {
        let pipeline: LoginPipeline = PipelineBuilder::new()
            .then(EstablishKeyExchange)
            .savepoint(CREDENTIALS)
            .then(RecoverablePhase::new("SubmitCredentials", ResumeSession).fallback(PasswordLogin))
            .then_or_jump(InterpretServerChallenge, CREDENTIALS)
            .then(RegisterSession)
            .finish()
            .finally(LogLoginOutcome)
            .finally(ClearCredentials)
            .build()?;

        Ok(Self {
            services: Arc::new(services),
            pipeline,
        })
    }

    pub fn services(&self) -> &SsoServices {
        &self.services
    }

    /// Run the login handshake on `connection`.
    ///
    /// Credential rewinds and fast-to-slow fallbacks each spend one unit of
    /// `budget`. A failed login carries every superseded failure as
    /// suppressed; a successful one reports them in
    /// [`LoginOutcome::recovered`].
    pub async fn login(&self, connection: &Arc<Connection>, budget: &RetryBudget) -> Result<LoginOutcome, Error> {
        let span = tracing::info_span!(
            "sso",
            connection_id = %connection.id(),
            address = %connection.address()
        );
        let data = LoginContext::new(Arc::clone(connection), Arc::clone(&self.services));
        let mut ctx = PipelineContext::new(data, budget.clone()).with_span(span);

        let session = self
            .pipeline
            .execute(&mut ctx, ())
            .await
            .map_err(Error::from_collected)?;

        Ok(LoginOutcome {
            session,
            recovered: ctx.collector().all().to_vec(),
        })
    }
}

impl std::fmt::Debug for SsoProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsoProcessor")
            .field("nodes", &self.pipeline.nodes().len())
            .finish()
    }
}
