//! Command-object services: one `Processor<Input>` impl per operation a service understands.

use std::future::Future;

pub trait Processor<Input> {
    type Output;
    type Error;

    fn process(
        &self,
        input: Input,
    ) -> impl Future<Output = Result<Self::Output, Self::Error>> + Send;
}
