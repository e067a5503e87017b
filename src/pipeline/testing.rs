//! Small phases shared by the engine's unit tests.

use async_trait::async_trait;
use thiserror::Error;

use crate::error::PipelineError;
use crate::pipeline::context::{AttributeKey, PipelineContext};
use crate::pipeline::node::{Finally, Phase};

pub type Ctx = PipelineContext<Vec<String>, TestError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TestError {
    #[error("{0} failed")]
    Step(&'static str),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

pub struct Step<I, O> {
    name: &'static str,
    f: fn(&mut Ctx, I) -> Result<O, TestError>,
}

pub fn step<I, O>(name: &'static str, f: fn(&mut Ctx, I) -> Result<O, TestError>) -> Step<I, O> {
    Step { name, f }
}

#[async_trait]
impl<I: Send + 'static, O: Send + 'static> Phase<Vec<String>, TestError> for Step<I, O> {
    type Input = I;
    type Output = O;

    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, ctx: &mut Ctx, input: I) -> Result<O, TestError> {
        (self.f)(ctx, input)
    }
}

const ATTEMPTS: AttributeKey<u32> = AttributeKey::new("attempts");

/// Fails until its `succeed_on`th run, then adds one to its input.
pub struct Attempt {
    name: &'static str,
    succeed_on: u32,
}

pub fn attempt(name: &'static str, succeed_on: u32) -> Attempt {
    Attempt { name, succeed_on }
}

#[async_trait]
impl Phase<Vec<String>, TestError> for Attempt {
    type Input = u32;
    type Output = u32;

    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, ctx: &mut Ctx, input: u32) -> Result<u32, TestError> {
        let n = ctx.attributes().get(&ATTEMPTS).copied().unwrap_or(0) + 1;
        ctx.attributes_mut().insert(&ATTEMPTS, n);
        ctx.data_mut().push(format!("{}:{input}", self.name));
        if n < self.succeed_on {
            Err(TestError::Step(self.name))
        } else {
            Ok(input + 1)
        }
    }
}

pub struct Cleanup {
    name: &'static str,
    fail: bool,
}

pub fn cleanup(name: &'static str) -> Cleanup {
    Cleanup { name, fail: false }
}

pub fn failing_cleanup(name: &'static str) -> Cleanup {
    Cleanup { name, fail: true }
}

#[async_trait]
impl Finally<Vec<String>, TestError> for Cleanup {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, ctx: &mut Ctx) -> Result<(), TestError> {
        let outcome = ctx.outcome().map(|o| format!("{o:?}")).unwrap_or_default();
        ctx.data_mut().push(format!("finally:{}:{outcome}", self.name));
        if self.fail {
            Err(TestError::Step(self.name))
        } else {
            Ok(())
        }
    }
}

