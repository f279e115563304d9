//! Session module
//!
//! The shared [`Runtime`] and the per-connection [`Session`] through which
//! DML, cursors, package state and transaction control are driven.

pub mod runtime;
#[allow(clippy::module_inception)]
pub mod session;

pub use runtime::Runtime;
pub use session::{Assignments, Selection, Session};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, DataType, Schema};
    use crate::error::Error;
    use crate::storage::Value;

    fn runtime() -> Runtime {
        let rt = Runtime::default();
        rt.create_table(
            "emp",
            Schema::from_columns(vec![
                Column::new("empno", DataType::Integer).primary_key(true),
                Column::new("ename", DataType::Text),
                Column::new("sal", DataType::Integer),
            ]),
        )
        .unwrap();
        rt
    }

    fn set(column: &str, value: impl Into<Value>) -> Assignments {
        let mut set = Assignments::new();
        set.insert(column.to_string(), value.into());
        set
    }

    #[test]
    fn test_insert_update_delete() {
        let rt = runtime();
        let mut s = rt.connect("SCOTT");
        assert_eq!(s.principal(), "SCOTT");

        assert_eq!(s.insert_row("emp", vec![1.into(), "KING".into(), 5000.into()]).unwrap(), 1);
        assert_eq!(s.insert_row("emp", vec![2.into(), "FORD".into(), 3000.into()]).unwrap(), 1);

        let n = s
            .update("emp", set("sal", 3500), Selection::filter("sal < 4000").unwrap())
            .unwrap();
        assert_eq!(n, 1);
        let row = s.select_into("SELECT sal FROM emp WHERE empno = 2", &[]).unwrap();
        assert_eq!(row.get("sal"), Some(&Value::Integer(3500)));

        assert_eq!(s.delete("emp", Selection::All).unwrap(), 2);
        assert_eq!(rt.database().row_count("emp").unwrap(), 0);
    }

    #[test]
    fn test_select_into_cardinality() {
        let rt = runtime();
        let mut s = rt.connect_default();
        assert_eq!(s.principal(), "ARCPROC");
        assert!(matches!(
            s.select_into("SELECT * FROM emp", &[]),
            Err(Error::NoDataFound)
        ));

        s.insert_row("emp", vec![1.into(), "KING".into(), 5000.into()]).unwrap();
        s.insert_row("emp", vec![2.into(), "FORD".into(), 3000.into()]).unwrap();
        assert!(matches!(
            s.select_into("SELECT * FROM emp", &[]),
            Err(Error::TooManyRows(2))
        ));

        let row = s
            .select_into("SELECT ename FROM emp WHERE sal > :min", &[("MIN", Value::Integer(4000))])
            .unwrap();
        assert_eq!(row.get("ename"), Some(&Value::from("KING")));
    }

    #[test]
    fn test_unknown_update_column_changes_nothing() {
        let rt = runtime();
        let mut s = rt.connect_default();
        s.insert_row("emp", vec![1.into(), "KING".into(), 5000.into()]).unwrap();
        assert!(matches!(
            s.update("emp", set("bonus", 1), Selection::All),
            Err(Error::ColumnNotFound(..))
        ));
        assert!(matches!(
            s.insert_row("emp", vec![2.into()]),
            Err(Error::ArityMismatch { expected: 3, found: 1, .. })
        ));
        assert_eq!(rt.database().row_count("emp").unwrap(), 1);
    }

    #[test]
    fn test_savepoints_and_rollback() {
        let rt = runtime();
        let mut s = rt.connect_default();
        s.insert_row("emp", vec![1.into(), "KING".into(), 5000.into()]).unwrap();
        s.savepoint("a").unwrap();
        s.insert_row("emp", vec![2.into(), "FORD".into(), 3000.into()]).unwrap();
        s.rollback_to_savepoint("A").unwrap();
        assert_eq!(rt.database().row_count("emp").unwrap(), 1);
        assert!(matches!(
            s.rollback_to_savepoint("b"),
            Err(Error::UnknownSavepoint(_))
        ));

        s.rollback().unwrap();
        assert_eq!(rt.database().row_count("emp").unwrap(), 0);
        assert!(s.transaction().state == crate::transaction::TransactionState::Active);
    }

    #[test]
    fn test_commit_releases_locks() {
        let rt = runtime();
        let mut s = rt.connect_default();
        s.insert_row("emp", vec![1.into(), "KING".into(), 5000.into()]).unwrap();
        let row_id = crate::storage::RowId::new("emp", 1);
        assert!(rt.locks().holds(&row_id, s.id()));

        s.commit().unwrap();
        assert_eq!(rt.locks().holder(&row_id), None);
        s.rollback().unwrap();
        assert_eq!(rt.database().row_count("emp").unwrap(), 1);
    }

    #[test]
    fn test_closed_session_rejects_work() {
        let rt = runtime();
        let mut s = rt.connect_default();
        s.insert_row("emp", vec![1.into(), "KING".into(), 5000.into()]).unwrap();
        s.close().unwrap();
        assert!(s.is_closed());
        assert_eq!(rt.database().row_count("emp").unwrap(), 0);
        assert!(matches!(
            s.delete("emp", Selection::All),
            Err(Error::SessionClosed(_))
        ));
        s.close().unwrap();
    }
}
