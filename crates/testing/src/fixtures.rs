//! Test fixtures with realistic, randomized data.

use crawler_common::{CrawlerConfig, IntervalConfig};
use crawler_domain::{DocumentDescription, JobId, RepositoryConnection};
use fake::{
    faker::{internet::en::DomainSuffix, lorem::en::Word},
    Fake,
};

/// Divisor applied to production intervals in agent tests
pub const TEST_INTERVAL_DIVISOR: u64 = 100;

/// A random host name such as `lorem.org`.
pub fn random_host() -> String {
    let name: String = Word().fake();
    let suffix: String = DomainSuffix().fake();
    format!("{}{}.{suffix}", name.to_lowercase(), (1..10_000u32).fake::<u32>())
}

/// A random document URL on `host`.
pub fn random_document_identifier(host: &str) -> String {
    let path: String = Word().fake();
    format!("http://{host}/{path}/{}", (1..1_000_000u32).fake::<u32>())
}

/// `per_host` fresh documents for each of `hosts` random hosts, grouped by host.
pub fn create_test_documents(job_id: JobId, hosts: usize, per_host: usize) -> Vec<DocumentDescription> {
    (0..hosts)
        .flat_map(|_| {
            let host = random_host();
            (0..per_host)
                .map(|i| DocumentDescription::new(job_id, format!("http://{host}/doc/{i}")))
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Connection `name` with no throttles.
pub fn create_test_connection(name: &str) -> RepositoryConnection {
    RepositoryConnection::new(name, "scripted")
}

/// Agent configuration with few threads and intervals short enough for tests.
pub fn create_test_config(threads: usize) -> CrawlerConfig {
    CrawlerConfig {
        threads,
        delete_threads: 1,
        expire_threads: 1,
        delete_batch_size: 5,
        intervals: IntervalConfig::default().scaled(TEST_INTERVAL_DIVISOR),
        ..CrawlerConfig::default()
    }
}
