use arcproc::catalog::{Column, DataType, Schema};
use arcproc::cursor::CursorDefinition;
use arcproc::package::PackageDefinition;
use arcproc::storage::{Tuple, Value};
use arcproc::trigger::{CompoundTriggerDefinition, TriggerDefinition, TriggerEvents, TriggerTiming};
use arcproc::{Assignments, Error, Runtime, RuntimeConfig, Selection};
use std::sync::{Arc, Mutex};

fn runtime(config: RuntimeConfig) -> Runtime {
    let rt = Runtime::new(config);
    rt.create_table(
        "emp",
        Schema::from_columns(vec![
            Column::new("empno", DataType::Integer).primary_key(true),
            Column::new("ename", DataType::Text),
            Column::new("sal", DataType::Integer),
            Column::new("deptno", DataType::Integer),
        ]),
    )
    .unwrap();
    rt.create_table(
        "emp_audit",
        Schema::from_columns(vec![
            Column::new("empno", DataType::Integer),
            Column::new("action", DataType::Text),
        ]),
    )
    .unwrap();
    rt.create_package(
        PackageDefinition::new("audit")
            .variable("last_count", Value::Null)
            .variable("count_at_start", Value::Null)
            .variable("fired", 0),
    )
    .unwrap();
    rt
}

fn emp(empno: i64, ename: &str, sal: i64, deptno: i64) -> Tuple {
    Tuple::new(vec![empno.into(), ename.into(), sal.into(), deptno.into()])
}

fn seed(rt: &Runtime) {
    let mut s = rt.connect("SETUP");
    s.insert(
        "emp",
        vec![
            emp(7369, "SMITH", 800, 20),
            emp(7499, "ALLEN", 1600, 30),
            emp(7521, "WARD", 1250, 30),
            emp(7566, "JONES", 2975, 20),
        ],
    )
    .unwrap();
    s.commit().unwrap();
}

fn set(column: &str, value: impl Into<Value>) -> Assignments {
    let mut set = Assignments::new();
    set.insert(column.to_string(), value.into());
    set
}

#[test]
fn test_before_row_trigger_mutates_new_row() {
    let rt = runtime(RuntimeConfig::default());
    rt.create_trigger(TriggerDefinition::new(
        "emp_min_sal",
        "emp",
        TriggerTiming::BeforeRow,
        TriggerEvents::insert().or_update(),
        |scope| {
            let sal = scope.new_row()?.get("sal")?.as_i64().unwrap_or(0);
            if sal < 1000 {
                scope.set_new("sal", 1000)?;
            }
            let upper = scope.new_row()?.get("ename")?.to_string().to_uppercase();
            scope.set_new("ename", upper)
        },
    ))
    .unwrap();

    let mut s = rt.connect_default();
    s.insert("emp", vec![emp(1, "scott", 500, 20)]).unwrap();
    let row = s.select_into("SELECT ename, sal FROM emp WHERE empno = 1", &[]).unwrap();
    assert_eq!(row.get("ename"), Some(&Value::from("SCOTT")));
    assert_eq!(row.get("sal"), Some(&Value::Integer(1000)));

    s.update("emp", set("sal", 10), Selection::filter("empno = 1").unwrap())
        .unwrap();
    let row = s.select_into("SELECT sal FROM emp WHERE empno = 1", &[]).unwrap();
    assert_eq!(row.get("sal"), Some(&Value::Integer(1000)));
}

#[test]
fn test_after_row_trigger_cannot_write_new() {
    let rt = runtime(RuntimeConfig::default());
    rt.create_trigger(TriggerDefinition::new(
        "emp_late_fix",
        "emp",
        TriggerTiming::AfterRow,
        TriggerEvents::insert(),
        |scope| scope.set_new("sal", 0),
    ))
    .unwrap();

    let mut s = rt.connect_default();
    let err = s.insert("emp", vec![emp(1, "SCOTT", 500, 20)]).unwrap_err();
    assert!(matches!(err.root_cause(), Error::ReadOnlyBinding(_)));
    assert_eq!(rt.database().row_count("emp").unwrap(), 0);
}

#[test]
fn test_row_trigger_touching_its_own_table_is_mutating() {
    let rt = runtime(RuntimeConfig::default());
    seed(&rt);
    rt.create_trigger(TriggerDefinition::new(
        "emp_recount",
        "emp",
        TriggerTiming::AfterRow,
        TriggerEvents::update(),
        |scope| {
            scope
                .session()
                .update("emp", set("deptno", 0), Selection::All)
                .map(|_| ())
        },
    ))
    .unwrap();

    let mut s = rt.connect_default();
    let err = s
        .update("emp", set("sal", 5000), Selection::filter("empno = 7369").unwrap())
        .unwrap_err();
    match &err {
        Error::Handler { trigger, .. } => assert_eq!(trigger, "emp_recount"),
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(err.root_cause(), Error::MutatingTable(t) if t == "emp"));

    let row = s.select_into("SELECT sal FROM emp WHERE empno = 7369", &[]).unwrap();
    assert_eq!(row.get("sal"), Some(&Value::Integer(800)));
}

#[test]
fn test_row_trigger_may_change_its_table_through_current_of() {
    let rt = runtime(RuntimeConfig::default());
    seed(&rt);
    rt.create_trigger(TriggerDefinition::new(
        "emp_dept_rebalance",
        "emp",
        TriggerTiming::AfterRow,
        TriggerEvents::insert(),
        |scope| {
            let deptno = scope.new_row()?.get("deptno")?.clone();
            let session = scope.session();
            let c = session.declare_cursor(
                CursorDefinition::builder("c_dept", "SELECT * FROM emp WHERE deptno = :d")
                    .param("d")
                    .for_update()
                    .build()?,
            )?;
            session.open(c, &[deptno])?;
            while let Some(row) = session.fetch(c)? {
                match row.get("ename").map(|v| v.to_string()).as_deref() {
                    Some("SMITH") => {
                        session.update_current(c, set("sal", 900))?;
                    }
                    Some("JONES") => {
                        session.delete_current(c)?;
                    }
                    _ => {}
                }
            }
            session.release_cursor(c)
        },
    ))
    .unwrap();

    let mut s = rt.connect_default();
    assert_eq!(s.insert("emp", vec![emp(7788, "SCOTT", 3000, 20)]).unwrap(), 1);
    let smith = s.select_into("SELECT sal FROM emp WHERE empno = 7369", &[]).unwrap();
    assert_eq!(smith.get("sal"), Some(&Value::Integer(900)));
    assert!(matches!(
        s.select_into("SELECT * FROM emp WHERE empno = 7566", &[]),
        Err(Error::NoDataFound)
    ));
    assert_eq!(rt.database().row_count("emp").unwrap(), 4);
    s.commit().unwrap();
}

#[test]
fn test_handler_cannot_end_the_transaction() {
    let rt = runtime(RuntimeConfig::default());
    seed(&rt);
    let refused = Arc::new(Mutex::new(Vec::new()));
    let log = refused.clone();
    rt.create_trigger(TriggerDefinition::new(
        "emp_early_commit",
        "emp",
        TriggerTiming::BeforeRow,
        TriggerEvents::update(),
        move |scope| {
            let session = scope.session();
            for result in [session.commit(), session.savepoint("inner"), session.rollback()] {
                if let Err(e) = result {
                    log.lock().unwrap().push(e);
                }
            }
            if scope.old()?.get("empno")? == &Value::Integer(7499) {
                return Err(Error::application(-20001, "boom"));
            }
            Ok(())
        },
    ))
    .unwrap();

    let mut s = rt.connect_default();
    let err = s.update("emp", set("sal", 0), Selection::All).unwrap_err();
    assert!(matches!(err.root_cause(), Error::Application { code: -20001, .. }));

    let refused = refused.lock().unwrap();
    assert_eq!(refused.len(), 6);
    assert!(refused
        .iter()
        .all(|e| matches!(e, Error::TransactionControlInTrigger(_))));

    // The first row's change went away with the failed statement
    let smith = s.select_into("SELECT sal FROM emp WHERE empno = 7369", &[]).unwrap();
    assert_eq!(smith.get("sal"), Some(&Value::Integer(800)));
    assert_eq!(s.transaction().change_count(), 0);
    s.commit().unwrap();
}

#[test]
fn test_row_trigger_may_write_other_tables() {
    let rt = runtime(RuntimeConfig::default());
    seed(&rt);
    rt.create_trigger(TriggerDefinition::new(
        "emp_audit_trg",
        "emp",
        TriggerTiming::AfterRow,
        TriggerEvents::all(),
        |scope| {
            assert_eq!(scope.trigger_name(), "emp_audit_trg");
            let ctx = scope.context();
            let (action, empno) = if ctx.deleting() {
                ("DELETE", scope.old()?.get("empno")?.clone())
            } else if ctx.inserting() {
                ("INSERT", scope.new_row()?.get("empno")?.clone())
            } else {
                ("UPDATE", scope.new_row()?.get("empno")?.clone())
            };
            scope
                .session()
                .insert_row("emp_audit", vec![empno, action.into()])
                .map(|_| ())
        },
    ))
    .unwrap();

    let mut s = rt.connect_default();
    assert_eq!(
        s.update("emp", set("sal", 3000), Selection::filter("deptno = 20").unwrap())
            .unwrap(),
        2
    );
    assert_eq!(s.delete("emp", Selection::filter("ename = 'WARD'").unwrap()).unwrap(), 1);
    assert_eq!(rt.database().row_count("emp_audit").unwrap(), 3);

    let row = s
        .select_into("SELECT empno FROM emp_audit WHERE action = 'DELETE'", &[])
        .unwrap();
    assert_eq!(row.get("empno"), Some(&Value::Integer(7521)));
}

#[test]
fn test_compound_trigger_counts_rows_per_statement() {
    let rt = runtime(RuntimeConfig::default());
    seed(&rt);
    rt.create_trigger(
        CompoundTriggerDefinition::new("emp_sal_tally", "emp", TriggerEvents::update_of(&["sal"]))
            .state_var("rows_seen", 0)
            .before_statement(|scope| {
                let start = scope.state()?.get("rows_seen")?;
                scope.session().set_var("audit", "count_at_start", start)
            })
            .after_each_row(|scope| scope.state()?.increment("rows_seen", 1).map(|_| ()))
            .after_statement(|scope| {
                let n = scope.state()?.get("rows_seen")?;
                let affected = scope.context().rows_affected() as i64;
                assert_eq!(n, Value::Integer(affected));
                scope.session().set_var("audit", "last_count", n)
            }),
    )
    .unwrap();

    let mut s = rt.connect_default();
    s.update("emp", set("sal", 1000), Selection::filter("deptno = 30").unwrap())
        .unwrap();
    assert_eq!(s.get_var("audit", "last_count").unwrap(), Value::Integer(2));
    assert_eq!(s.get_var("audit", "count_at_start").unwrap(), Value::Integer(0));

    let n = s
        .update("emp", set("sal", 4000), Selection::filter_with("empno = :id", &[("id", Value::Integer(7566))]).unwrap())
        .unwrap();
    assert_eq!(n, 1);
    assert_eq!(s.get_var("audit", "last_count").unwrap(), Value::Integer(1));
    assert_eq!(s.get_var("audit", "count_at_start").unwrap(), Value::Integer(0));

    // A statement matching no rows still runs the statement sections
    s.update("emp", set("sal", 1), Selection::filter("deptno = 99").unwrap())
        .unwrap();
    assert_eq!(s.get_var("audit", "last_count").unwrap(), Value::Integer(0));

    // UPDATE OF sal does not fire for other columns
    s.set_var("audit", "last_count", Value::Null).unwrap();
    s.update("emp", set("ename", "X"), Selection::All).unwrap();
    assert_eq!(s.get_var("audit", "last_count").unwrap(), Value::Null);
}

#[test]
fn test_failed_handler_rolls_back_whole_statement() {
    let rt = runtime(RuntimeConfig::default());
    rt.create_trigger(TriggerDefinition::new(
        "emp_cap",
        "emp",
        TriggerTiming::BeforeRow,
        TriggerEvents::insert(),
        |scope| {
            if scope.new_row()?.get("sal")?.as_i64().unwrap_or(0) > 5000 {
                return Err(Error::application(-20001, "salary above cap"));
            }
            Ok(())
        },
    ))
    .unwrap();
    rt.create_trigger(TriggerDefinition::new(
        "emp_log",
        "emp",
        TriggerTiming::AfterRow,
        TriggerEvents::insert(),
        |scope| {
            let empno = scope.new_row()?.get("empno")?.clone();
            scope
                .session()
                .insert_row("emp_audit", vec![empno, "INSERT".into()])
                .map(|_| ())
        },
    ))
    .unwrap();

    let mut s = rt.connect_default();
    s.insert("emp", vec![emp(1, "A", 100, 10)]).unwrap();

    let err = s
        .insert(
            "emp",
            vec![emp(2, "B", 200, 10), emp(3, "C", 300, 10), emp(4, "D", 9000, 10)],
        )
        .unwrap_err();
    assert!(matches!(
        err.root_cause(),
        Error::Application { code: -20001, .. }
    ));

    // Rows 2 and 3 and their audit rows are gone; the earlier statement stays
    assert_eq!(rt.database().row_count("emp").unwrap(), 1);
    assert_eq!(rt.database().row_count("emp_audit").unwrap(), 1);
    assert_eq!(s.transaction().change_count(), 2);
}

#[test]
fn test_instead_of_trigger_makes_view_updatable() {
    let rt = runtime(RuntimeConfig::default());
    seed(&rt);
    rt.create_view("emp_names", "SELECT empno, ename FROM emp").unwrap();
    rt.create_view("emp_sal", "SELECT empno, sal FROM emp").unwrap();
    rt.create_trigger(TriggerDefinition::new(
        "emp_names_ins",
        "emp_names",
        TriggerTiming::InsteadOf,
        TriggerEvents::insert().or_delete(),
        |scope| {
            if scope.context().inserting() {
                let new = scope.new_row()?;
                let values = vec![new.get("empno")?.clone(), new.get("ename")?.clone(), 0.into(), Value::Null];
                scope.session().insert_row("emp", values).map(|_| ())
            } else {
                let empno = scope.old()?.get("empno")?.clone();
                scope
                    .session()
                    .delete("emp", Selection::filter_with("empno = :e", &[("e", empno)])?)
                    .map(|_| ())
            }
        },
    ))
    .unwrap();

    let mut s = rt.connect_default();
    let n = s
        .insert("emp_names", vec![Tuple::new(vec![8000.into(), "MILLER".into()])])
        .unwrap();
    assert_eq!(n, 1);
    let row = s.select_into("SELECT sal FROM emp WHERE ename = 'MILLER'", &[]).unwrap();
    assert_eq!(row.get("sal"), Some(&Value::Integer(0)));

    assert_eq!(
        s.delete("emp_names", Selection::filter("empno > 7500").unwrap()).unwrap(),
        3
    );
    assert_eq!(rt.database().row_count("emp").unwrap(), 2);

    assert!(matches!(
        s.update("emp_names", set("ename", "X"), Selection::All),
        Err(Error::ViewNotUpdatable(_))
    ));
    assert!(matches!(
        s.delete("emp_sal", Selection::All),
        Err(Error::ViewNotUpdatable(_))
    ));
    assert!(matches!(
        rt.create_trigger(TriggerDefinition::new(
            "emp_bad",
            "emp_sal",
            TriggerTiming::BeforeRow,
            TriggerEvents::insert(),
            |_| Ok(()),
        )),
        Err(Error::InvalidTriggerTarget { .. })
    ));
}

#[test]
fn test_when_condition_and_disable() {
    let rt = runtime(RuntimeConfig::default());
    seed(&rt);
    rt.create_trigger(
        TriggerDefinition::new(
            "emp_raise_watch",
            "emp",
            TriggerTiming::AfterRow,
            TriggerEvents::update_of(&["sal"]),
            |scope| {
                scope
                    .session()
                    .package("audit")?
                    .with_state(|state| state.increment("fired", 1))
                    .map(|_| ())
            },
        )
        .when(|old, new| match (old, new) {
            (Some(old), Some(new)) => {
                let before = old.get("sal").ok().and_then(|v| v.as_i64()).unwrap_or(0);
                let after = new.get("sal").ok().and_then(|v| v.as_i64()).unwrap_or(0);
                after > before
            }
            _ => false,
        }),
    )
    .unwrap();

    let mut s = rt.connect_default();
    // SMITH and JONES (deptno 20) go to 2000: only SMITH is a raise
    s.update("emp", set("sal", 2000), Selection::filter("deptno = 20").unwrap())
        .unwrap();
    assert_eq!(s.get_var("audit", "fired").unwrap(), Value::Integer(1));

    rt.set_trigger_enabled("emp_raise_watch", false).unwrap();
    s.update("emp", set("sal", 9000), Selection::All).unwrap();
    assert_eq!(s.get_var("audit", "fired").unwrap(), Value::Integer(1));

    rt.set_trigger_enabled("emp_raise_watch", true).unwrap();
    s.update("emp", set("sal", 9500), Selection::All).unwrap();
    assert_eq!(s.get_var("audit", "fired").unwrap(), Value::Integer(5));

    rt.drop_trigger("emp_raise_watch").unwrap();
    s.update("emp", set("sal", 9900), Selection::All).unwrap();
    assert_eq!(s.get_var("audit", "fired").unwrap(), Value::Integer(5));
}

#[test]
fn test_trigger_nesting_depth_is_bounded() {
    let rt = runtime(RuntimeConfig::new().max_trigger_depth(4));
    // Statement triggers on each table write to the other
    rt.create_trigger(TriggerDefinition::new(
        "emp_ping",
        "emp",
        TriggerTiming::AfterStatement,
        TriggerEvents::insert(),
        |scope| {
            let depth = scope.context().depth() as i64;
            scope
                .session()
                .insert_row("emp_audit", vec![depth.into(), "PING".into()])
                .map(|_| ())
        },
    ))
    .unwrap();
    rt.create_trigger(TriggerDefinition::new(
        "audit_pong",
        "emp_audit",
        TriggerTiming::AfterStatement,
        TriggerEvents::insert(),
        |scope| {
            let depth = scope.context().depth() as i64;
            scope
                .session()
                .insert_row("emp", vec![(100 + depth).into(), "PONG".into(), 0.into(), 0.into()])
                .map(|_| ())
        },
    ))
    .unwrap();

    let mut s = rt.connect_default();
    let err = s.insert("emp", vec![emp(1, "A", 1, 1)]).unwrap_err();
    assert!(matches!(err.root_cause(), Error::TriggerDepthExceeded(4)));
    assert_eq!(rt.database().row_count("emp").unwrap(), 0);
    assert_eq!(rt.database().row_count("emp_audit").unwrap(), 0);
}
