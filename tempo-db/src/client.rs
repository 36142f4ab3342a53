//! The database client: the sole mutation surface over the plan database.
//!
//! Every external agent (parser, solver, replay tool) mutates the database
//! through this layer, which allows uniform transaction logging and replay.
//! When logging is enabled, each token is addressable by a *relative path*:
//! the key of a root token followed by slave positions within each master.

use serde::{Deserialize, Serialize};
use tracing::debug;

use tempo_core::domain::Domain;
use tempo_core::errors::Inconsistent;
use tempo_core::keys::{ConstraintKey, ObjectKey, TokenKey, VarKey};

use crate::database::PlanDatabase;
use crate::errors::ClientError;
use crate::token::TokenSpec;

const TARGET: &str = "tempo_db::client";

/// One logged mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Transaction {
    CreateVariable { var: VarKey, name: String },
    DeleteVariable { var: VarKey },
    CreateObject { object: ObjectKey, type_name: String, name: String },
    DeleteObject { object: ObjectKey },
    CreateToken { token: TokenKey, predicate: String },
    DeleteToken { token: TokenKey },
    Constrain { object: ObjectKey, predecessor: TokenKey, successor: TokenKey },
    Free { object: ObjectKey, predecessor: TokenKey, successor: TokenKey },
    Activate { token: TokenKey },
    Merge { token: TokenKey, active: TokenKey },
    Reject { token: TokenKey },
    Cancel { token: TokenKey },
    CreateConstraint { constraint: ConstraintKey, name: String },
    DeleteConstraint { constraint: ConstraintKey },
    Restrict { var: VarKey },
    Specify { var: VarKey, value: i64 },
    Reset { var: VarKey },
    CloseVariable { var: VarKey },
    CloseType { type_name: String },
    CloseDatabase,
    Propagate { consistent: bool },
}

/// Synchronous, fallible mutation surface with optional transaction logging.
pub struct DbClient {
    db: PlanDatabase,
    log: Vec<Transaction>,
    logging: bool,
}

impl DbClient {
    pub fn new(db: PlanDatabase) -> Self {
        Self {
            db,
            log: Vec::new(),
            logging: false,
        }
    }

    pub fn enable_transaction_logging(&mut self) {
        self.logging = true;
    }

    pub fn transaction_log(&self) -> &[Transaction] {
        &self.log
    }

    pub fn db(&self) -> &PlanDatabase {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut PlanDatabase {
        &mut self.db
    }

    pub fn into_db(self) -> PlanDatabase {
        self.db
    }

    fn record(&mut self, transaction: Transaction) {
        if self.logging {
            debug!(target: TARGET, ?transaction, "logged");
            self.log.push(transaction);
        }
    }

    // ---- variables ----

    pub fn create_variable(
        &mut self,
        name: &str,
        base: Domain,
    ) -> Result<VarKey, ClientError> {
        let var = self.db.create_global_variable(name, base)?;
        self.record(Transaction::CreateVariable {
            var,
            name: name.to_string(),
        });
        Ok(var)
    }

    pub fn delete_variable(&mut self, var: VarKey) -> Result<(), ClientError> {
        self.db.engine_mut().delete_variable(var);
        self.record(Transaction::DeleteVariable { var });
        Ok(())
    }

    pub fn specify(&mut self, var: VarKey, value: i64) -> Result<(), ClientError> {
        self.db.specify_variable(var, value)?;
        self.record(Transaction::Specify { var, value });
        Ok(())
    }

    pub fn reset(&mut self, var: VarKey) -> Result<(), ClientError> {
        self.db.reset_variable(var)?;
        self.record(Transaction::Reset { var });
        Ok(())
    }

    pub fn restrict(&mut self, var: VarKey, restriction: &Domain) -> Result<(), ClientError> {
        self.db.restrict_variable(var, restriction)?;
        self.record(Transaction::Restrict { var });
        Ok(())
    }

    pub fn close_variable(&mut self, var: VarKey) -> Result<(), ClientError> {
        self.db.close_variable(var)?;
        self.record(Transaction::CloseVariable { var });
        Ok(())
    }

    // ---- objects ----

    pub fn create_object(
        &mut self,
        type_name: &str,
        name: &str,
    ) -> Result<ObjectKey, ClientError> {
        let object = self.db.create_closed_object(type_name, name)?;
        self.record(Transaction::CreateObject {
            object,
            type_name: type_name.to_string(),
            name: name.to_string(),
        });
        Ok(object)
    }

    pub fn delete_object(&mut self, object: ObjectKey) -> Result<(), ClientError> {
        self.db.delete_object(object)?;
        self.record(Transaction::DeleteObject { object });
        Ok(())
    }

    // ---- tokens ----

    pub fn create_token(&mut self, spec: TokenSpec) -> Result<TokenKey, ClientError> {
        let predicate = format!("{}.{}", spec.object_type, spec.predicate);
        let token = self.db.create_token(spec)?;
        self.record(Transaction::CreateToken { token, predicate });
        Ok(token)
    }

    pub fn create_slave_token(
        &mut self,
        master: TokenKey,
        relation: &str,
        spec: TokenSpec,
    ) -> Result<TokenKey, ClientError> {
        let predicate = format!("{}.{}", spec.object_type, spec.predicate);
        let token = self.db.create_slave_token(master, relation, spec)?;
        self.record(Transaction::CreateToken { token, predicate });
        Ok(token)
    }

    pub fn delete_token(&mut self, token: TokenKey) -> Result<(), ClientError> {
        self.db.delete_token(token)?;
        self.record(Transaction::DeleteToken { token });
        Ok(())
    }

    pub fn activate(&mut self, token: TokenKey) -> Result<(), ClientError> {
        self.db.activate(token)?;
        self.record(Transaction::Activate { token });
        Ok(())
    }

    pub fn merge(&mut self, token: TokenKey, active: TokenKey) -> Result<(), ClientError> {
        self.db.merge(token, active)?;
        self.record(Transaction::Merge { token, active });
        Ok(())
    }

    pub fn reject(&mut self, token: TokenKey) -> Result<(), ClientError> {
        self.db.reject(token)?;
        self.record(Transaction::Reject { token });
        Ok(())
    }

    pub fn cancel(&mut self, token: TokenKey) -> Result<(), ClientError> {
        self.db.cancel(token)?;
        self.record(Transaction::Cancel { token });
        Ok(())
    }

    // ---- ordering ----

    pub fn constrain(
        &mut self,
        object: ObjectKey,
        predecessor: TokenKey,
        successor: TokenKey,
    ) -> Result<(), ClientError> {
        self.db.constrain(object, predecessor, successor)?;
        self.record(Transaction::Constrain {
            object,
            predecessor,
            successor,
        });
        Ok(())
    }

    pub fn free(
        &mut self,
        object: ObjectKey,
        predecessor: TokenKey,
        successor: TokenKey,
    ) -> Result<(), ClientError> {
        self.db.free(object, predecessor, successor)?;
        self.record(Transaction::Free {
            object,
            predecessor,
            successor,
        });
        Ok(())
    }

    // ---- constraints ----

    pub fn create_constraint(
        &mut self,
        name: &str,
        scope: &[VarKey],
    ) -> Result<ConstraintKey, ClientError> {
        let constraint = self
            .db
            .engine_mut()
            .create_constraint_by_name(name, scope)
            .map_err(crate::errors::ModellingError::from)?;
        self.record(Transaction::CreateConstraint {
            constraint,
            name: name.to_string(),
        });
        Ok(constraint)
    }

    pub fn delete_constraint(&mut self, constraint: ConstraintKey) -> Result<(), ClientError> {
        self.db
            .engine_mut()
            .remove_constraint(constraint)
            .map_err(crate::errors::ModellingError::from)?;
        self.record(Transaction::DeleteConstraint { constraint });
        Ok(())
    }

    // ---- schema & propagation ----

    pub fn close_type(&mut self, type_name: &str) -> Result<(), ClientError> {
        self.db.close_type(type_name)?;
        self.record(Transaction::CloseType {
            type_name: type_name.to_string(),
        });
        Ok(())
    }

    pub fn close(&mut self) -> Result<(), ClientError> {
        self.db.close()?;
        self.record(Transaction::CloseDatabase);
        Ok(())
    }

    pub fn propagate(&mut self) -> Result<(), Inconsistent> {
        let result = self.db.propagate();
        let consistent = result.is_ok();
        self.record(Transaction::Propagate { consistent });
        result
    }

    // ---- token paths ----

    /// Relative path of a token: root key, then the slave position inside
    /// each master on the way down.
    pub fn path_by_token(&self, token: TokenKey) -> Result<Vec<u32>, ClientError> {
        if !self.logging {
            return Err(ClientError::LoggingDisabled);
        }
        let mut positions = Vec::new();
        let mut current = token;
        loop {
            let t = self
                .db
                .token(current)
                .ok_or(crate::errors::ModellingError::UnknownToken(current))?;
            match t.master() {
                Some(master) => {
                    let m = self
                        .db
                        .token(master)
                        .ok_or(crate::errors::ModellingError::UnknownToken(master))?;
                    let pos = m
                        .slaves()
                        .iter()
                        .position(|s| *s == current)
                        .ok_or(ClientError::BadTokenPath { path: vec![] })?;
                    positions.push(pos as u32);
                    current = master;
                }
                None => break,
            }
        }
        let mut path = vec![current.raw()];
        positions.reverse();
        path.extend(positions);
        Ok(path)
    }

    /// Resolve a relative path back to a token. Round-trips with
    /// `path_by_token` on every logged token.
    pub fn token_by_path(&self, path: &[u32]) -> Result<TokenKey, ClientError> {
        if !self.logging {
            return Err(ClientError::LoggingDisabled);
        }
        let bad = || ClientError::BadTokenPath {
            path: path.to_vec(),
        };
        let (&root, rest) = path.split_first().ok_or_else(bad)?;
        let mut current = self
            .db
            .tokens()
            .map(|t| t.key())
            .find(|k| k.raw() == root)
            .ok_or_else(bad)?;
        for &pos in rest {
            let t = self.db.token(current).ok_or_else(bad)?;
            current = *t.slaves().get(pos as usize).ok_or_else(bad)?;
        }
        Ok(current)
    }
}
