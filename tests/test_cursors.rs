use arcproc::catalog::{Column, DataType, Schema};
use arcproc::cursor::{CursorDefinition, LockAcquisition};
use arcproc::storage::{RowId, Value};
use arcproc::transaction::WaitPolicy;
use arcproc::{Assignments, Error, Runtime, RuntimeConfig, Selection};
use std::thread;
use std::time::Duration;

fn emp_runtime(config: RuntimeConfig) -> Runtime {
    let rt = Runtime::new(config);
    rt.create_table(
        "emp",
        Schema::from_columns(vec![
            Column::new("empno", DataType::Integer).primary_key(true),
            Column::new("ename", DataType::Text),
            Column::new("salary", DataType::Integer),
        ]),
    )
    .unwrap();

    let mut s = rt.connect("SETUP");
    for (empno, ename, salary) in [
        (7369, "SMITH", 40000),
        (7499, "ALLEN", 55000),
        (7521, "WARD", 30000),
        (7566, "JONES", 70000),
        (7839, "KING", 90000),
    ] {
        s.insert_row("emp", vec![empno.into(), ename.into(), salary.into()])
            .unwrap();
    }
    s.commit().unwrap();
    rt
}

fn set(column: &str, value: impl Into<Value>) -> Assignments {
    let mut set = Assignments::new();
    set.insert(column.to_string(), value.into());
    set
}

fn by_salary(for_update: bool) -> CursorDefinition {
    let builder = CursorDefinition::builder("c_emp", "SELECT * FROM emp WHERE salary > :min")
        .param_default("min", 0);
    if for_update {
        builder.for_update().build().unwrap()
    } else {
        builder.build().unwrap()
    }
}

#[test]
fn test_parameterized_cursor_scenario() {
    let rt = emp_runtime(RuntimeConfig::default());
    let mut s = rt.connect_default();
    let c = s.declare_cursor(by_salary(false)).unwrap();

    let attrs = s.cursor_attributes(c).unwrap();
    assert!(!attrs.is_open);

    s.open(c, &[Value::Integer(50000)]).unwrap();
    let attrs = s.cursor_attributes(c).unwrap();
    assert!(attrs.is_open);
    assert_eq!(attrs.found, None);
    assert_eq!(attrs.row_count, 0);

    let mut names = Vec::new();
    while let Some(row) = s.fetch(c).unwrap() {
        names.push(row.get("ename").unwrap().to_string());
    }
    assert_eq!(names, vec!["ALLEN", "JONES", "KING"]);

    let attrs = s.cursor_attributes(c).unwrap();
    assert_eq!(attrs.row_count, 3);
    assert_eq!(attrs.found, Some(false));
    assert_eq!(attrs.not_found, Some(true));

    // Fetching past the end keeps reporting not found
    assert!(s.fetch(c).unwrap().is_none());
    assert!(s.fetch(c).unwrap().is_none());
    assert_eq!(s.cursor_attributes(c).unwrap().row_count, 3);
}

#[test]
fn test_cursor_protocol_errors() {
    let rt = emp_runtime(RuntimeConfig::default());
    let mut s = rt.connect_default();
    let c = s.declare_cursor(by_salary(false)).unwrap();

    assert!(matches!(s.fetch(c), Err(Error::CursorNotOpen(_))));
    s.open(c, &[]).unwrap();
    assert!(matches!(s.open(c, &[]), Err(Error::AlreadyOpen(_))));
    assert_eq!(s.fetch_batch(c, 2).unwrap().len(), 2);

    s.close_cursor(c).unwrap();
    assert!(matches!(s.fetch(c), Err(Error::CursorNotOpen(_))));
    assert!(matches!(
        s.update_current(c, set("salary", 1)),
        Err(Error::CursorNotOpen(_))
    ));

    // Reopening starts over and resets the row count
    s.open(c, &[Value::Integer(60000)]).unwrap();
    assert_eq!(s.fetch_batch(c, 10).unwrap().len(), 2);
    assert_eq!(s.cursor_attributes(c).unwrap().row_count, 2);

    let locking = s.declare_cursor(by_salary(true)).unwrap();
    s.open(locking, &[]).unwrap();
    assert!(matches!(
        s.delete_current(locking),
        Err(Error::NoCurrentRow(_))
    ));
    assert!(matches!(
        s.open(locking, &[1.into(), 2.into()]),
        Err(Error::AlreadyOpen(_))
    ));
}

#[test]
fn test_for_update_fetch_conflict_without_wait() {
    let rt = emp_runtime(RuntimeConfig::new().lock_wait(WaitPolicy::NoWait));
    let mut s1 = rt.connect("S1");
    let mut s2 = rt.connect("S2");

    let c1 = s1.declare_cursor(by_salary(true)).unwrap();
    let c2 = s2.declare_cursor(by_salary(true)).unwrap();
    s1.open(c1, &[Value::Integer(80000)]).unwrap();
    s2.open(c2, &[Value::Integer(80000)]).unwrap();

    let king = s1.fetch(c1).unwrap().unwrap();
    let row_id = king.row_id.clone().unwrap();
    assert_eq!(rt.locks().holder(&row_id), Some(s1.id()));

    assert!(matches!(s2.fetch(c2), Err(Error::LockConflict(r)) if r == row_id));
    assert_eq!(rt.locks().holder(&row_id), Some(s1.id()));

    // Closing an unmodified cursor releases its lock
    s1.close_cursor(c1).unwrap();
    s2.close_cursor(c2).unwrap();
    s2.open(c2, &[Value::Integer(80000)]).unwrap();
    assert!(s2.fetch(c2).unwrap().is_some());
    assert_eq!(rt.locks().holder(&row_id), Some(s2.id()));
}

#[test]
fn test_for_update_waiter_proceeds_after_commit() {
    let rt = emp_runtime(RuntimeConfig::new().lock_wait(WaitPolicy::Timeout(5000)));
    let mut s1 = rt.connect("S1");
    let mut s2 = rt.connect("S2");

    let c1 = s1.declare_cursor(by_salary(true)).unwrap();
    s1.open(c1, &[Value::Integer(80000)]).unwrap();
    let row_id = s1.fetch(c1).unwrap().unwrap().row_id.unwrap();
    s1.update_current(c1, set("salary", 95000)).unwrap();

    let waiter = thread::spawn(move || {
        let c2 = s2.declare_cursor(by_salary(true)).unwrap();
        s2.open(c2, &[Value::Integer(80000)]).unwrap();
        let row = s2.fetch(c2).unwrap();
        (s2, row)
    });

    thread::sleep(Duration::from_millis(100));
    assert_eq!(rt.locks().holder(&row_id), Some(s1.id()));
    s1.commit().unwrap();

    let (s2, row) = waiter.join().unwrap();
    let row = row.unwrap();
    assert_eq!(row.get("salary"), Some(&Value::Integer(95000)));
    assert_eq!(rt.locks().holder(&row_id), Some(s2.id()));
}

#[test]
fn test_for_update_wait_times_out() {
    let rt = emp_runtime(RuntimeConfig::new().lock_wait(WaitPolicy::Timeout(50)));
    let mut s1 = rt.connect("S1");
    let mut s2 = rt.connect("S2");

    let c1 = s1.declare_cursor(by_salary(true)).unwrap();
    s1.open(c1, &[Value::Integer(80000)]).unwrap();
    s1.fetch(c1).unwrap().unwrap();

    let c2 = s2.declare_cursor(by_salary(true)).unwrap();
    s2.open(c2, &[Value::Integer(80000)]).unwrap();
    let err = s2.fetch(c2).unwrap_err();
    assert!(matches!(err, Error::LockTimeout(_)));
    assert!(err.is_contention());
}

#[test]
fn test_lock_on_open_takes_every_row() {
    let rt = emp_runtime(
        RuntimeConfig::new()
            .lock_wait(WaitPolicy::NoWait)
            .lock_acquisition(LockAcquisition::OnOpen),
    );
    let mut s1 = rt.connect("S1");
    let mut s2 = rt.connect("S2");

    let c1 = s1.declare_cursor(by_salary(true)).unwrap();
    s1.open(c1, &[Value::Integer(50000)]).unwrap();
    assert_eq!(
        rt.locks().holder(&RowId::new("emp", 4)),
        Some(s1.id()),
        "JONES locked before any fetch"
    );

    let c2 = s2.declare_cursor(by_salary(true)).unwrap();
    assert!(matches!(
        s2.open(c2, &[Value::Integer(0)]),
        Err(Error::LockConflict(_))
    ));
    // All-or-nothing: the conflicting open left s2 holding nothing
    assert_eq!(rt.locks().holder(&RowId::new("emp", 1)), None);
}

#[test]
fn test_current_of_targets_fetched_row_not_key() {
    let rt = emp_runtime(RuntimeConfig::default());
    let mut s = rt.connect_default();
    let c = s
        .declare_cursor(
            CursorDefinition::builder("c_low", "SELECT * FROM emp WHERE salary < 45000")
                .for_update()
                .build()
                .unwrap(),
        )
        .unwrap();
    s.open(c, &[]).unwrap();

    let smith = s.fetch(c).unwrap().unwrap();
    assert_eq!(smith.get("ename"), Some(&Value::from("SMITH")));

    // Changing the key leaves the cursor positioned on the same stored row
    assert_eq!(s.update_current(c, set("empno", 1)).unwrap(), 1);
    assert_eq!(s.update_current(c, set("salary", 41000)).unwrap(), 1);
    let row = s
        .select_into("SELECT ename, salary FROM emp WHERE empno = 1", &[])
        .unwrap();
    assert_eq!(row.get("ename"), Some(&Value::from("SMITH")));
    assert_eq!(row.get("salary"), Some(&Value::Integer(41000)));
    assert!(matches!(
        s.select_into("SELECT * FROM emp WHERE empno = 7369", &[]),
        Err(Error::NoDataFound)
    ));

    let ward = s.fetch(c).unwrap().unwrap();
    assert_eq!(ward.get("ename"), Some(&Value::from("WARD")));
    assert_eq!(s.delete_current(c).unwrap(), 1);
    assert!(s.fetch(c).unwrap().is_none());
    assert_eq!(rt.database().row_count("emp").unwrap(), 4);

    // Other rows were never touched
    let allen = s
        .select_into("SELECT salary FROM emp WHERE ename = 'ALLEN'", &[])
        .unwrap();
    assert_eq!(allen.get("salary"), Some(&Value::Integer(55000)));
}

#[test]
fn test_modified_rows_stay_locked_after_close() {
    let rt = emp_runtime(RuntimeConfig::new().lock_wait(WaitPolicy::NoWait));
    let mut s1 = rt.connect("S1");
    let mut s2 = rt.connect("S2");

    let c = s1.declare_cursor(by_salary(true)).unwrap();
    s1.open(c, &[Value::Integer(60000)]).unwrap();
    let jones = s1.fetch(c).unwrap().unwrap().row_id.unwrap();
    s1.update_current(c, set("salary", 71000)).unwrap();
    let king = s1.fetch(c).unwrap().unwrap().row_id.unwrap();
    s1.close_cursor(c).unwrap();

    assert_eq!(rt.locks().holder(&jones), Some(s1.id()));
    assert_eq!(rt.locks().holder(&king), None);
    assert!(matches!(
        s2.update("emp", set("salary", 0), Selection::filter("empno = 7566").unwrap()),
        Err(Error::LockConflict(_))
    ));

    s1.rollback().unwrap();
    assert_eq!(rt.locks().holder(&jones), None);
    assert_eq!(
        s2.update("emp", set("salary", 0), Selection::filter("empno = 7566").unwrap())
            .unwrap(),
        1
    );
}
