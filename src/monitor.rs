//! Builds the running system from a [`Config`]
//!
//! Instance brokers and their probes are created first, then every branch is
//! assembled bottom-up so each fan-in can subscribe to children that already
//! exist.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use rand::Rng;
use tracing::info;

use crate::actors::broker::BrokerConfig;
use crate::actors::exporter::ExporterHandle;
use crate::actors::probe::ProbeHandle;
use crate::config::Config;
use crate::status::{ApplicationSummary, CollectionSummary, ServiceSummary};
use crate::tree::{ApplicationNode, Collection, InstanceNode, ServiceNode};

/// Name of the root node
pub const COLLECTION_NAME: &str = "applications";

type InstanceTree = BTreeMap<String, BTreeMap<String, BTreeMap<String, InstanceNode>>>;

/// The whole monitoring tree plus its collaborators
pub struct Monitor {
    config: Config,
    collection: Collection,
    probes: Vec<ProbeHandle>,
    exporter: Option<ExporterHandle>,
}

impl Monitor {
    /// Build the tree, start one probe per instance and, when configured,
    /// the metric exporter. Probe jitter is drawn from `rng`.
    pub async fn start<R: Rng + Send>(config: Config, mut rng: R) -> Result<Self> {
        config.validate()?;
        let broker = BrokerConfig::from(&config.broker);

        let mut probes = Vec::new();
        let mut instances = InstanceTree::new();
        for (app, application) in &config.applications {
            for (svc, service) in &application.services {
                let nodes = instances
                    .entry(app.clone())
                    .or_default()
                    .entry(svc.clone())
                    .or_default();
                for address in &service.instances {
                    let node = InstanceNode::new(address.clone(), broker);
                    let probe = ProbeHandle::spawn(
                        address.clone(),
                        &service.check.resolve(address),
                        node.feed(),
                        &mut rng,
                    )
                    .with_context(|| format!("failed to start probe for {app}/{svc}/{address}"))?;
                    probes.push(probe);
                    nodes.insert(address.clone(), node);
                }
            }
        }

        let collection = Self::assemble(&config, instances, broker).await?;

        let exporter = match &config.opentsdb {
            Some(opentsdb) => {
                info!("exporting metrics to {}", opentsdb.address);
                Some(ExporterHandle::spawn(&collection, opentsdb).await?)
            }
            None => None,
        };

        info!(
            applications = config.applications.len(),
            instances = probes.len(),
            "monitor started"
        );

        Ok(Self {
            config,
            collection,
            probes,
            exporter,
        })
    }

    async fn assemble(config: &Config, instances: InstanceTree, broker: BrokerConfig) -> Result<Collection> {
        let mut applications = BTreeMap::new();

        for (app, services_of_app) in instances {
            let mut services = BTreeMap::new();

            for (svc, nodes) in services_of_app {
                let max_failures = config
                    .applications
                    .get(&app)
                    .and_then(|application| application.services.get(&svc))
                    .map(|service| service.max_failures)
                    .unwrap_or_default();
                let seed = ServiceSummary {
                    max_failures,
                    ..Default::default()
                };
                let service = ServiceNode::assemble(svc.clone(), seed, nodes, broker).await?;
                services.insert(svc, service);
            }

            let application =
                ApplicationNode::assemble(app.clone(), ApplicationSummary::default(), services, broker)
                    .await?;
            applications.insert(app, application);
        }

        Collection::assemble(COLLECTION_NAME, CollectionSummary::default(), applications, broker).await
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn probes(&self) -> &[ProbeHandle] {
        &self.probes
    }

    pub fn probe(&self, address: &str) -> Option<&ProbeHandle> {
        self.probes.iter().find(|probe| probe.address() == address)
    }

    pub fn exporter(&self) -> Option<&ExporterHandle> {
        self.exporter.as_ref()
    }

    /// Stop probes and flush the exporter.
    pub async fn shutdown(&self) {
        for probe in &self.probes {
            probe.clone().shutdown().await;
        }
        if let Some(exporter) = &self.exporter {
            exporter.clone().shutdown().await;
        }
    }
}
