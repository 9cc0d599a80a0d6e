mod common;

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use fleet_core::{
        models::{JobFilter, JobKey, JobStatus, JobUpsert, NewNode},
        FleetError,
    };
    use fleet_infrastructure::node_client::Method;
    use fleet_testing_utils::{register_node, FakeNode};
    use serde_json::json;

    use super::common::Harness;

    fn new_node(name: &str, url: &str) -> NewNode {
        NewNode {
            name: name.to_string(),
            url: url.to_string(),
            username: None,
            password: None,
        }
    }

    async fn seed_running_job(harness: &Harness, node: &str, job_id: &str) -> i64 {
        let mut upsert = JobUpsert::new(JobKey::new("bookstore", job_id, node), "books", JobStatus::Running);
        upsert.start_time = Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());
        upsert.update_time = upsert.start_time;
        harness.jobs.upsert_job(&upsert).await.unwrap();

        let page = harness
            .jobs
            .list_jobs(node, &JobFilter::default())
            .await
            .unwrap();
        page.items
            .iter()
            .find(|job| job.job_id == job_id)
            .map(|job| job.id)
            .unwrap()
    }

    #[tokio::test]
    async fn test_node_statuses_omit_failing_nodes() {
        let harness = Harness::new().await;
        let node_a = FakeNode::start("node-a").await;
        let node_b = FakeNode::start("node-b").await;
        register_node(harness.directory.as_ref(), "node-a", &node_a.url()).await;
        register_node(harness.directory.as_ref(), "node-b", &node_b.url()).await;
        node_a.set_listing(json!({
            "pending": [{"id": "p1", "project": "bookstore", "spider": "books"}],
            "running": [],
            "finished": []
        }));
        node_b.set_failing(Some("maintenance"));

        let statuses = harness.cluster().node_statuses().await.unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].name, "node-a");
        assert_eq!(statuses[0].node_name, "node-a");
        assert_eq!(statuses[0].pending, 1);
        assert_eq!(statuses[0].running, 0);
    }

    #[tokio::test]
    async fn test_add_node_with_credentials() {
        let harness = Harness::new().await;
        let node = FakeNode::start("node-a").await;
        let cluster = harness.cluster();

        let added = cluster
            .add_node(NewNode {
                username: Some("scrapy".to_string()),
                password: Some("s3cret".to_string()),
                ..new_node("node-a", &node.url())
            })
            .await
            .unwrap();
        assert!(added.has_credentials());
        let stored = harness.directory.get_node("node-a").await.unwrap();
        assert_ne!(stored.password.as_deref(), Some(b"s3cret".as_slice()));

        let projects = cluster.list_projects("node-a").await.unwrap();
        assert_eq!(projects, vec!["bookstore".to_string()]);
        let auth = node.requests_for("listprojects.json")[0]
            .authorization
            .clone()
            .unwrap();
        assert!(auth.starts_with("Basic "));

        // 轮换为无凭证
        cluster.update_credentials("node-a", None, None).await.unwrap();
        cluster.list_versions("node-a", "bookstore").await.unwrap();
        assert!(node.requests_for("listversions.json")[0]
            .authorization
            .is_none());
    }

    #[tokio::test]
    async fn test_add_node_validation() {
        let harness = Harness::new().await;
        let cluster = harness.cluster();

        for request in [
            new_node(" ", "http://10.0.0.1:6800"),
            new_node("node-a", ""),
            new_node("a/b", "http://10.0.0.1:6800"),
            new_node("bad\nnode", "http://10.0.0.1:6800"),
            new_node("a b", "http://10.0.0.1:6800"),
            new_node("node-a", "not a url"),
            new_node("node-a", "ftp://10.0.0.1"),
            NewNode {
                password: Some("orphan".to_string()),
                ..new_node("node-a", "http://10.0.0.1:6800")
            },
        ] {
            let err = cluster.add_node(request).await.unwrap_err();
            assert!(err.is_validation(), "unexpected error: {err}");
        }
        assert!(cluster.list_nodes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_spiders_passes_project() {
        let harness = Harness::new().await;
        let node = FakeNode::start("node-a").await;
        register_node(harness.directory.as_ref(), "node-a", &node.url()).await;
        node.set_spiders(&["books"]);

        let spiders = harness
            .cluster()
            .list_spiders("node-a", "bookstore")
            .await
            .unwrap();
        assert_eq!(spiders, vec!["books".to_string()]);
        assert_eq!(
            node.requests_for("listspiders.json")[0].field("project"),
            Some("bookstore")
        );
    }

    #[tokio::test]
    async fn test_stop_job_cancels_and_records_actor() {
        let harness = Harness::new().await;
        let node = FakeNode::start("node-a").await;
        register_node(harness.directory.as_ref(), "node-a", &node.url()).await;
        let id = seed_running_job(&harness, "node-a", "j1").await;

        let job = harness.cluster().stop_job(id, Some("carol")).await.unwrap();
        assert_eq!(job.stopped_by.as_deref(), Some("carol"));

        let cancel = &node.requests_for("cancel.json")[0];
        assert_eq!(cancel.field("project"), Some("bookstore"));
        assert_eq!(cancel.field("job"), Some("j1"));

        assert!(matches!(
            harness.cluster().stop_job(9999, None).await,
            Err(FleetError::JobNotFound { id: 9999 })
        ));
    }

    #[tokio::test]
    async fn test_stop_job_remote_failure_keeps_row() {
        let harness = Harness::new().await;
        let node = FakeNode::start("node-a").await;
        register_node(harness.directory.as_ref(), "node-a", &node.url()).await;
        let id = seed_running_job(&harness, "node-a", "j1").await;
        node.set_failing(Some("no such job"));

        let err = harness.cluster().stop_job(id, Some("carol")).await.unwrap_err();
        assert!(err.is_remote());
        let job = harness.jobs.get_job(id).await.unwrap().unwrap();
        assert!(job.stopped_by.is_none());
    }

    #[tokio::test]
    async fn test_node_jobs_reconciles_first_page_only() {
        let harness = Harness::new().await;
        let node = FakeNode::start("node-a").await;
        register_node(harness.directory.as_ref(), "node-a", &node.url()).await;
        node.set_listing(json!({
            "pending": [],
            "running": [{"id": "j1", "project": "bookstore", "spider": "books",
                         "start_time": "2024-05-01 10:00:00"}],
            "finished": []
        }));
        let cluster = harness.cluster();

        let page = cluster
            .node_jobs("node-a", &JobFilter::default())
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(node.requests_for("listjobs.json").len(), 1);

        let second = JobFilter {
            page: 2,
            ..Default::default()
        };
        let page = cluster.node_jobs("node-a", &second).await.unwrap();
        assert!(page.items.is_empty());
        assert_eq!(node.requests_for("listjobs.json").len(), 1);

        // 节点故障时仍返回已存储的作业
        node.set_failing(Some("down"));
        let page = cluster
            .node_jobs("node-a", &JobFilter::default())
            .await
            .unwrap();
        assert_eq!(page.total, 1);

        assert!(matches!(
            cluster.node_jobs("node-z", &JobFilter::default()).await,
            Err(FleetError::NodeNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_job_hides_row() {
        let harness = Harness::new().await;
        register_node(harness.directory.as_ref(), "node-a", "http://127.0.0.1:1").await;
        let id = seed_running_job(&harness, "node-a", "j1").await;
        let cluster = harness.cluster();

        let job = cluster.get_job(id).await.unwrap();
        assert_eq!(job.job_id, "j1");
        assert_eq!(job.node, "node-a");

        cluster.delete_job(id).await.unwrap();
        let page = harness
            .jobs
            .list_jobs("node-a", &JobFilter::default())
            .await
            .unwrap();
        assert_eq!(page.total, 0);
        assert!(matches!(
            cluster.get_job(id).await,
            Err(FleetError::JobNotFound { .. })
        ));
        assert!(matches!(
            cluster.get_job(9999).await,
            Err(FleetError::JobNotFound { id: 9999 })
        ));
    }

    #[tokio::test]
    async fn test_node_jobs_search() {
        let harness = Harness::new().await;
        let node = FakeNode::start("node-a").await;
        register_node(harness.directory.as_ref(), "node-a", &node.url()).await;
        node.set_listing(json!({
            "pending": [],
            "running": [{"id": "j1", "project": "bookstore", "spider": "books",
                         "start_time": "2024-05-01 10:00:00"}],
            "finished": [{"id": "j2", "project": "news", "spider": "headlines",
                          "start_time": "2024-05-01 09:00:00",
                          "end_time": "2024-05-01 09:30:00"}]
        }));

        let filter = JobFilter {
            search: Some("HEADLINE".to_string()),
            ..Default::default()
        };
        let page = harness.cluster().node_jobs("node-a", &filter).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].job_id, "j2");
        assert_eq!(page.items[0].status, JobStatus::Finished);
    }

    #[tokio::test]
    async fn test_proxy_forwards_to_node() {
        let harness = Harness::new().await;
        let node = FakeNode::start("node-a").await;
        register_node(harness.directory.as_ref(), "node-a", &node.url()).await;

        let response = harness
            .cluster()
            .proxy(
                "node-a",
                Method::GET,
                "logs/bookstore/books/j1.log",
                Some("tail=100"),
                None,
                Vec::new(),
            )
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(
            String::from_utf8(response.body).unwrap(),
            "GET /logs/bookstore/books/j1.log @ node-a"
        );
        let forwarded = node.requests().pop().unwrap();
        assert_eq!(
            forwarded.forwarded_prefix.as_deref(),
            Some("/node-a/scrapyd-backend")
        );
    }
}
