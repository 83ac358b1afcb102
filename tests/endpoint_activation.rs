/// 엔드투엔드 통합 테스트
/// ConfigStore + ProcessSupervisor + LocalRegistry 를 실제 워커 프로세스와 함께 검증

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use endpoint_host::config::{ConfigStore, HostContext};
use endpoint_host::endpoint::{ClassId, RpcError};
use endpoint_host::rpc::{LocalRegistry, WorkerServer};
use endpoint_host::supervisor::{ProcessSupervisor, SupervisorOptions};

const WORKER_BIN: &str = env!("CARGO_BIN_EXE_endpoint-host");

fn fresh_class_id() -> ClassId {
    ClassId::new(uuid::Uuid::new_v4())
}

fn options() -> SupervisorOptions {
    SupervisorOptions {
        poll_attempts: 300,
        poll_interval: Duration::from_millis(50),
    }
}

/// 실제 바이너리의 `serve` 명령을 워커로 사용하는 설정 파일 작성
fn write_worker_config(dir: &Path, registry: &Path, class_id: &ClassId) -> PathBuf {
    let path = dir.join("worker.cfg");
    let body = format!(
        "# demo worker\n\
         CLSID={}\n\
         Command=\"{}\" serve --registry \"{}\" --class-id $(CLSID)\n\
         WorkingDir=$(ConfigDir)\n\
         RedirectOutput=$(ConfigDir)/worker.log\n\
         EnvironmentExclude=RUST_LOG\n",
        class_id,
        WORKER_BIN,
        registry.display()
    );
    std::fs::write(&path, body).unwrap();
    path
}

fn store_for_tests() -> ConfigStore {
    ConfigStore::new(HostContext::capture().unwrap())
}

async fn wait_until_dead(supervisor: &ProcessSupervisor, config: &endpoint_host::config::Config) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if !supervisor.is_alive(config).unwrap() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn spawned_worker_serves_and_goes_away() {
    let dir = tempfile::tempdir().unwrap();
    let registry_dir = dir.path().join("registry");
    let class_id = fresh_class_id();
    let cfg_path = write_worker_config(dir.path(), &registry_dir, &class_id);

    let store = store_for_tests();
    let config = store.get_config(&cfg_path).unwrap();
    let registry = LocalRegistry::new(&registry_dir);
    let supervisor = ProcessSupervisor::new(Arc::new(registry.clone()), options());

    let endpoint = supervisor
        .activate(&config, &CancellationToken::new())
        .await
        .unwrap_or_else(|e| panic!("activation failed: {}", e));

    assert_eq!(endpoint.invoke("echo", &[json!("hi"), json!(2)]).unwrap(), json!(["hi", 2]));
    let worker_pid = endpoint.invoke("pid", &[]).unwrap().as_u64().unwrap();
    assert_ne!(worker_pid, std::process::id() as u64);
    assert!(supervisor.is_alive(&config).unwrap());
    assert_eq!(registry.lookup(&class_id).unwrap().pid as u64, worker_pid);

    assert_eq!(endpoint.invoke("shutdown", &[]).unwrap(), Value::Null);
    assert!(wait_until_dead(&supervisor, &config).await, "worker never went away");
    assert!(registry.lookup(&class_id).is_none());

    // the worker's own log ends up in the redirect file
    let log = std::fs::read_to_string(dir.path().join("worker.log")).unwrap();
    assert!(log.contains("Shutdown requested"), "log was {:?}", log);

    // a dead endpoint is replaced by a freshly spawned worker
    let endpoint = supervisor.connect(&config, &CancellationToken::new()).await.unwrap();
    let second_pid = endpoint.invoke("pid", &[]).unwrap().as_u64().unwrap();
    assert_ne!(second_pid, worker_pid);
    endpoint.invoke("shutdown", &[]).unwrap();
    assert!(wait_until_dead(&supervisor, &config).await);
}

#[tokio::test]
async fn registered_worker_is_used_without_spawning() {
    let dir = tempfile::tempdir().unwrap();
    let registry = LocalRegistry::new(dir.path().join("registry"));
    let class_id = fresh_class_id();

    let cfg_path = dir.path().join("inproc.cfg");
    std::fs::write(
        &cfg_path,
        format!("CLSID={}\nCommand=/nonexistent/worker\nWorkingDir=$(ConfigDir)\n", class_id),
    )
    .unwrap();

    let server = WorkerServer::start(registry.clone(), class_id, |method: &str, _: &[Value]| {
        Ok::<_, RpcError>(json!(method))
    })
    .unwrap();

    let store = store_for_tests();
    let config = store.get_config(&cfg_path).unwrap();
    let supervisor = ProcessSupervisor::new(Arc::new(registry.clone()), options());
    let endpoint = supervisor.activate(&config, &CancellationToken::new()).await.unwrap();
    assert_eq!(endpoint.invoke("hello", &[]).unwrap(), json!("hello"));
    assert_eq!(endpoint.type_info_count().unwrap(), 1);

    drop(server);
    assert!(!supervisor.is_alive(&config).unwrap());

    // 워커가 없고 Command 도 실행 불가 → 스폰 실패
    let err = supervisor.activate(&config, &CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.error_code(), "PROCESS_SPAWN_FAILED");
}

#[tokio::test]
async fn touched_config_reloads_and_drops_old_connection() {
    let dir = tempfile::tempdir().unwrap();
    let registry = LocalRegistry::new(dir.path().join("registry"));
    let class_id = fresh_class_id();
    let cfg_path = dir.path().join("touch.cfg");
    std::fs::write(&cfg_path, format!("CLSID={}\nWorkingDir=.\n", class_id)).unwrap();

    let _server = WorkerServer::start(registry.clone(), class_id, |_: &str, _: &[Value]| {
        Ok::<_, RpcError>(Value::Null)
    })
    .unwrap();

    let store = store_for_tests();
    let supervisor = ProcessSupervisor::new(Arc::new(registry), options());

    let first = store.get_config(&cfg_path).unwrap();
    let endpoint = supervisor.activate(&first, &CancellationToken::new()).await.unwrap();
    assert!(Arc::ptr_eq(&first, &store.get_config(&cfg_path).unwrap()));

    let later = SystemTime::now() + Duration::from_secs(30);
    std::fs::File::options()
        .write(true)
        .open(&cfg_path)
        .unwrap()
        .set_modified(later)
        .unwrap();

    let second = store.get_config(&cfg_path).unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(first.endpoint().is_none());
    assert!(second.endpoint().is_none());
    // released handles report the worker as unreachable
    assert!(!endpoint.is_alive().unwrap());
}

#[tokio::test]
async fn cancelled_activation_returns_promptly() {
    let dir = tempfile::tempdir().unwrap();
    let class_id = fresh_class_id();
    // worker registers under a different directory, so polling never succeeds
    let cfg_path = write_worker_config(dir.path(), &dir.path().join("elsewhere"), &class_id);

    let store = store_for_tests();
    let config = store.get_config(&cfg_path).unwrap();
    let supervisor = ProcessSupervisor::new(Arc::new(LocalRegistry::new(dir.path().join("registry"))), options());

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            cancel.cancel();
        });
    }
    let started = Instant::now();
    let err = supervisor.activate(&config, &cancel).await.unwrap_err();
    assert_eq!(err.error_code(), "CANCELLED");
    assert!(started.elapsed() < Duration::from_secs(5));

    // the worker was left running; stop it through its own registration
    let elsewhere = LocalRegistry::new(dir.path().join("elsewhere"));
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Ok(endpoint) = endpoint_host::endpoint::Activator::activate(&elsewhere, &class_id) {
            endpoint.invoke("shutdown", &[]).unwrap();
            break;
        }
        assert!(Instant::now() < deadline, "worker never registered");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
