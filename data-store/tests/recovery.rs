//! Crash-recovery contract: jobs left `running` by a dead process are
//! returned to `queued` on the next startup.

use data_store::{Database, JobStatus, NewJob};
use serde_json::json;

#[test]
fn running_jobs_survive_a_simulated_crash() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.db");

    let job_id = {
        let db = Database::open(&path).unwrap();
        let id = db
            .enqueue_job(NewJob::new("scan", json!({"scan_id": 1})))
            .unwrap();
        let claimed = db.dequeue_job().unwrap().unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.status, JobStatus::Running);
        id
        // Database dropped here with the job still `running` — the crash.
    };

    let db = Database::open(&path).unwrap();
    assert_eq!(db.recover_running_jobs().unwrap(), 1);

    let job = db.get_job(&job_id).unwrap();
    assert_eq!(job.status, JobStatus::Queued);

    let reclaimed = db.dequeue_job().unwrap().unwrap();
    assert_eq!(reclaimed.id, job_id);
    assert_eq!(reclaimed.attempts, 2);
}

#[test]
fn recovery_leaves_terminal_jobs_alone() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.db");

    let db = Database::open(&path).unwrap();
    let done = db.enqueue_job(NewJob::new("a", json!({}))).unwrap();
    db.dequeue_job().unwrap().unwrap();
    db.complete_job(&done, None).unwrap();

    let failed = db.enqueue_job(NewJob::new("b", json!({}))).unwrap();
    db.dequeue_job().unwrap().unwrap();
    db.fail_job(&failed, "boom").unwrap();
    drop(db);

    let db = Database::open(&path).unwrap();
    assert_eq!(db.recover_running_jobs().unwrap(), 0);
    assert_eq!(db.get_job(&done).unwrap().status, JobStatus::Done);
    assert_eq!(db.get_job(&failed).unwrap().status, JobStatus::Failed);
}
