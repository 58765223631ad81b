//! Scenario 1: undo ordering across a single quantum, and release
//! ordering on a fresh one.

use std::cell::RefCell;
use std::rc::Rc;

use voltcore::config::CoreConfig;
use voltcore::undo::{UndoAction, UndoLog};

struct RecordingAction {
    label: &'static str,
    trace: Rc<RefCell<Vec<String>>>,
}

impl UndoAction for RecordingAction {
    fn undo(&mut self) {
        self.trace.borrow_mut().push(format!("undo:{}", self.label));
    }
    fn release(&mut self) {
        self.trace.borrow_mut().push(format!("release:{}", self.label));
    }
}

fn register(log: &mut UndoLog, label: &'static str, trace: &Rc<RefCell<Vec<String>>>) {
    log.current_mut()
        .expect("quantum was just generated")
        .register_undo_action(
            Box::new(RecordingAction {
                label,
                trace: trace.clone(),
            }),
            None,
        );
}

#[test]
fn undo_yields_reverse_order_release_yields_forward_order() {
    let config = CoreConfig::default();
    let trace = Rc::new(RefCell::new(Vec::new()));

    let mut log = UndoLog::new(&config);
    log.generate_undo_quantum(1).unwrap();
    register(&mut log, "A", &trace);
    register(&mut log, "B", &trace);
    register(&mut log, "C", &trace);
    log.undo(1).unwrap();
    assert_eq!(
        *trace.borrow(),
        vec!["undo:C".to_string(), "undo:B".to_string(), "undo:A".to_string()]
    );

    trace.borrow_mut().clear();
    log.generate_undo_quantum(2).unwrap();
    register(&mut log, "A", &trace);
    register(&mut log, "B", &trace);
    register(&mut log, "C", &trace);
    log.release(2).unwrap();
    assert_eq!(
        *trace.borrow(),
        vec!["release:A".to_string(), "release:B".to_string(), "release:C".to_string()]
    );
}

#[test]
fn generate_undo_quantum_rejects_non_increasing_tokens() {
    let config = CoreConfig::default();
    let mut log = UndoLog::new(&config);
    log.generate_undo_quantum(5).unwrap();
    assert!(log.generate_undo_quantum(5).is_err());
    assert!(log.generate_undo_quantum(3).is_err());
    assert!(log.generate_undo_quantum(6).is_ok());
}
