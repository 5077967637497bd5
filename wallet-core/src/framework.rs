use sqlx::PgPool;

/// A handler of one message or command type.
///
/// Entity queries and mutations are small command structs processed
/// against an executor, which keeps every statement individually named,
/// traced, and testable.
pub trait Processor<M> {
    type Output;
    type Error;

    fn process(
        &mut self,
        message: M,
    ) -> impl std::future::Future<Output = Result<Self::Output, Self::Error>> + Send;
}

/// Yields an executor for one statement.
///
/// Implemented by both the pool-backed and the transaction-backed
/// processors, so a single-statement command is written once and runs in
/// either scope.
pub trait DatabaseAccessor {
    fn acquire(&mut self) -> impl sqlx::PgExecutor<'_> + Send;
}

/// Executes entity commands against the shared connection pool.
///
/// Commands that span multiple statements open their own transaction;
/// single-statement commands run directly on the pool.
pub struct DatabaseProcessor {
    pub pool: PgPool,
}

/// Executes entity commands inside an open transaction. The caller keeps
/// ownership of the commit/rollback decision through the `tx` field.
pub struct TransactionProcessor<'b> {
    pub tx: sqlx::Transaction<'b, sqlx::Postgres>,
}

impl DatabaseAccessor for DatabaseProcessor {
    fn acquire(&mut self) -> impl sqlx::PgExecutor<'_> + Send {
        &self.pool
    }
}

impl<'b> DatabaseAccessor for TransactionProcessor<'b> {
    fn acquire(&mut self) -> impl sqlx::PgExecutor<'_> + Send {
        &mut *self.tx
    }
}
