//! Rendering a dashboard: variables, interpolation, instance lookup and one
//! mounted module per panel.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::join_all;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::container::ContainerScope;
use crate::dashboard::{DashboardTemplate, ResolvedPanel};
use crate::error::{Result, RuntimeError};
use crate::module_host::{HostRequest, HostView, ModuleHost, VersionedProps, PANEL_EXPORT};
use crate::module_loader::ModuleLoader;
use crate::registry::PluginRegistry;
use crate::time_range::TimeRange;
use crate::variables::{VariableProducer, VariableResolver, VariableValue};

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPanel {
    pub panel: ResolvedPanel,
    pub view: HostView,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedRow {
    pub title: String,
    pub description: String,
    pub auto_height: bool,
    pub panels: Vec<RenderedPanel>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedDashboard {
    pub key: String,
    pub title: String,
    pub variables: Vec<VariableValue>,
    pub rows: Vec<RenderedRow>,
}

/// A panel position's host and the props it was last mounted with.
struct PanelSlot {
    host: ModuleHost,
    props: Mutex<VersionedProps>,
}

pub struct DashboardRenderer {
    registry: Arc<PluginRegistry>,
    resolver: VariableResolver,
    loader: Arc<ModuleLoader>,
    scope: Arc<ContainerScope>,
    slots: DashMap<String, Arc<PanelSlot>>,
}

impl DashboardRenderer {
    pub fn new(
        registry: Arc<PluginRegistry>,
        producer: Arc<dyn VariableProducer>,
        loader: Arc<ModuleLoader>,
        scope: Arc<ContainerScope>,
    ) -> Self {
        Self {
            registry,
            resolver: VariableResolver::new(producer),
            loader,
            scope,
            slots: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Render `template`. `variables` carries the requested selections from
    /// the previous render; empty means start from the declarations.
    ///
    /// Variable and interpolation failures fail the whole dashboard. Panel
    /// failures only affect their own [`RenderedPanel::view`].
    pub async fn render(
        &self,
        template: &DashboardTemplate,
        variables: &[VariableValue],
        time: &TimeRange,
    ) -> Result<RenderedDashboard> {
        let key = template.key();
        let requested = if variables.is_empty() {
            template.initial_variables()
        } else {
            variables.to_vec()
        };

        let resolved = self
            .resolver
            .resolve(&key, &self.registry, &requested, time, &template.satellite)
            .await?;
        let rows = template.resolve_rows(&resolved, time)?;

        let mut rendered = Vec::with_capacity(rows.len());
        let mut live = HashSet::new();
        for (r, row) in rows.into_iter().enumerate() {
            let mut mounts = Vec::with_capacity(row.panels.len());
            for (p, panel) in row.panels.into_iter().enumerate() {
                let slot_key = format!("{key}#{r}/{p}");
                live.insert(slot_key.clone());
                mounts.push(self.mount(slot_key, panel, time));
            }
            let panels = join_all(mounts).await;
            rendered.push(RenderedRow {
                title: row.title,
                description: row.description,
                auto_height: row.auto_height,
                panels,
            });
        }

        // Panel positions this render no longer has.
        let prefix = format!("{key}#");
        self.slots
            .retain(|slot_key, _| !slot_key.starts_with(&prefix) || live.contains(slot_key));

        tracing::debug!(dashboard = %key, rows = rendered.len(), "dashboard rendered");
        Ok(RenderedDashboard {
            title: if template.title.is_empty() {
                template.name.clone()
            } else {
                template.title.clone()
            },
            key,
            variables: resolved,
            rows: rendered,
        })
    }

    /// Drop cached variables and remount every panel of `template`. Settled
    /// module loads are not repeated.
    pub fn retry(&self, template: &DashboardTemplate) {
        let key = template.key();
        self.resolver.invalidate(&key);
        let prefix = format!("{key}#");
        for slot in self.slots.iter().filter(|s| s.key().starts_with(&prefix)) {
            slot.host.remount();
        }
    }

    /// Release everything held for `template` once it is no longer shown.
    pub fn forget(&self, template: &DashboardTemplate) {
        let key = template.key();
        self.resolver.invalidate(&key);
        let prefix = format!("{key}#");
        self.slots.retain(|slot_key, _| !slot_key.starts_with(&prefix));
        tracing::debug!(dashboard = %key, "dashboard released");
    }

    /// Mounted panel positions across all dashboards.
    pub fn mounted_panels(&self) -> usize {
        self.slots.len()
    }

    async fn mount(
        &self,
        slot_key: String,
        panel: ResolvedPanel,
        time: &TimeRange,
    ) -> RenderedPanel {
        let Some(instance) = self
            .registry
            .get_instance(&panel.satellite, &panel.plugin_type, &panel.name)
        else {
            let err = RuntimeError::Configuration(format!(
                "plugin instance {}/{}/{} was not found",
                panel.satellite, panel.plugin_type, panel.name
            ));
            tracing::warn!(panel = %panel.title, "{err}");
            return RenderedPanel {
                view: HostView::error(&err),
                panel,
            };
        };

        let props: Value = json!({
            "satellite": panel.satellite,
            "type": panel.plugin_type,
            "name": panel.name,
            "title": panel.title,
            "description": panel.description,
            "options": panel.options,
            "instance": instance,
            "times": time,
        });

        let slot = Arc::clone(
            self.slots
                .entry(slot_key)
                .or_insert_with(|| {
                    let version = self.registry.version();
                    Arc::new(PanelSlot {
                        host: ModuleHost::new(self.loader.clone(), self.scope.clone(), version),
                        props: Mutex::new(VersionedProps::new(Value::Null)),
                    })
                })
                .value(),
        );

        let props = {
            let mut current = slot.props.lock();
            current.update(props);
            current.clone()
        };
        let request = HostRequest {
            name: instance.plugin_type.clone(),
            module_export: PANEL_EXPORT.to_string(),
            props,
        };

        let view = slot.host.render(&request).await;
        RenderedPanel { panel, view }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::tests::echo_factory;
    use crate::container::{SharedScope, StaticContainer};
    use crate::dashboard::tests::overview;
    use crate::module_host::tests::LinkingHost;
    use crate::registry::tests::sample_registry;
    use crate::script_cache::tests::CountingHost;
    use crate::script_cache::ScriptCache;
    use crate::variables::tests::{window, PrefixProducer};

    fn renderer(failing: &[&str]) -> (Arc<CountingHost>, DashboardRenderer) {
        renderer_with(failing, Arc::new(PrefixProducer::default()))
    }

    fn renderer_with(
        failing: &[&str],
        producer: Arc<PrefixProducer>,
    ) -> (Arc<CountingHost>, DashboardRenderer) {
        let counting = Arc::new(CountingHost {
            failing: failing.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        });
        let scope = Arc::new(ContainerScope::new(SharedScope::new()));
        let host = LinkingHost {
            inner: counting.clone(),
            scope: scope.clone(),
            container: StaticContainer::new().with_export(PANEL_EXPORT, echo_factory("panel")),
        };
        let cache = Arc::new(ScriptCache::new(Arc::new(host)));
        let loader = Arc::new(ModuleLoader::new(cache, "https://kobs.example.com"));
        let renderer = DashboardRenderer::new(Arc::new(sample_registry()), producer, loader, scope);
        (counting, renderer)
    }

    fn rendered_props(view: &HostView) -> &Value {
        match view {
            HostView::Rendered(value) => &value["props"],
            other => panic!("expected rendered view, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn renders_every_panel_with_interpolated_options() {
        let (counting, renderer) = renderer(&[]);
        let dashboard = overview();

        let out = renderer.render(&dashboard, &[], &window(100, 200)).await.unwrap();
        assert_eq!(out.title, "Overview");
        assert_eq!(out.variables[0].value, "prod");
        assert_eq!(out.rows[0].title, "prod");

        let requests = rendered_props(&out.rows[0].panels[0].view);
        assert_eq!(requests["type"], "prometheus");
        assert_eq!(requests["satellite"], "dev-de1");
        assert_eq!(requests["options"]["from"], "100");
        assert_eq!(requests["instance"]["satellite"], "dev-de1");
        assert_eq!(requests["times"]["timeStart"], 100);

        let logs = rendered_props(&out.rows[0].panels[1].view);
        assert_eq!(logs["type"], "sql");
        assert_eq!(counting.count_for("prometheus"), 1);
        assert_eq!(counting.count_for("sql"), 1);
    }

    #[tokio::test]
    async fn missing_instance_only_breaks_its_panel() {
        let (counting, renderer) = renderer(&[]);
        let mut dashboard = overview();
        dashboard.rows = json!([{
            "panels": [
                {"title": "Traces", "plugin": {"type": "jaeger", "name": "jaeger"}},
                {"title": "Requests", "plugin": {"type": "prometheus", "name": "prometheus"}}
            ]
        }]);

        let out = renderer.render(&dashboard, &[], &window(0, 60)).await.unwrap();
        let HostView::Error(err) = &out.rows[0].panels[0].view else {
            panic!("expected error view");
        };
        assert!(!err.retryable);
        assert!(err.message.contains("dev-de1/jaeger/jaeger"));
        assert!(matches!(out.rows[0].panels[1].view, HostView::Rendered(_)));
        assert_eq!(counting.count_for("jaeger"), 0);
    }

    #[tokio::test]
    async fn failed_module_is_isolated_and_retry_does_not_refetch() {
        let (counting, renderer) = renderer(&["sql"]);
        let dashboard = overview();

        let out = renderer.render(&dashboard, &[], &window(0, 60)).await.unwrap();
        assert!(out.rows[0].panels[1].view.is_error());
        assert!(matches!(out.rows[0].panels[0].view, HostView::Rendered(_)));

        renderer.retry(&dashboard);
        let again = renderer.render(&dashboard, &[], &window(0, 60)).await.unwrap();
        assert!(again.rows[0].panels[1].view.is_error());
        assert_eq!(counting.count_for("sql"), 1);
    }

    #[tokio::test]
    async fn selection_change_updates_props() {
        let (_, renderer) = renderer(&[]);
        let dashboard = overview();

        let first = renderer.render(&dashboard, &[], &window(0, 60)).await.unwrap();
        let mut selected = first.variables.clone();
        selected[0].value = "dev".to_string();

        let second = renderer.render(&dashboard, &selected, &window(0, 60)).await.unwrap();
        assert_eq!(second.rows[0].title, "dev");
        let props = rendered_props(&second.rows[0].panels[0].view);
        assert!(props["options"]["query"].as_str().unwrap().contains("cluster=\"dev\""));

        // Same inputs again: served from memo, same view.
        let third = renderer.render(&dashboard, &selected, &window(0, 60)).await.unwrap();
        assert_eq!(second, third);
    }

    #[tokio::test]
    async fn rerender_with_returned_variables_does_not_refetch() {
        let producer = Arc::new(PrefixProducer::default());
        let (_, renderer) = renderer_with(&[], producer.clone());
        let mut dashboard = overview();
        dashboard.variables = serde_json::from_value(json!([{
            "name": "cluster",
            "plugin": {"type": "prometheus", "name": "prometheus", "options": {"prefix": "prod"}}
        }]))
        .unwrap();

        let first = renderer.render(&dashboard, &[], &window(0, 60)).await.unwrap();
        assert_eq!(first.variables[0].value, "prod-1");
        let second = renderer
            .render(&dashboard, &first.variables, &window(0, 60))
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(producer.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shrinking_or_forgetting_a_dashboard_releases_panels() {
        let (_, renderer) = renderer(&[]);
        let mut dashboard = overview();
        renderer.render(&dashboard, &[], &window(0, 60)).await.unwrap();
        assert_eq!(renderer.mounted_panels(), 2);

        let mut other = overview();
        other.name = "other".to_string();
        renderer.render(&other, &[], &window(0, 60)).await.unwrap();
        assert_eq!(renderer.mounted_panels(), 4);

        dashboard.rows = json!([{
            "panels": [{
                "title": "Requests",
                "plugin": {"type": "prometheus", "name": "prometheus"}
            }]
        }]);
        let out = renderer.render(&dashboard, &[], &window(0, 60)).await.unwrap();
        assert_eq!(out.rows[0].panels.len(), 1);
        assert_eq!(renderer.mounted_panels(), 3);

        renderer.forget(&dashboard);
        assert_eq!(renderer.mounted_panels(), 2);
        renderer.forget(&other);
        assert_eq!(renderer.mounted_panels(), 0);
    }

    #[tokio::test]
    async fn broken_template_fails_the_dashboard() {
        let (_, renderer) = renderer(&[]);
        let mut dashboard = overview();
        dashboard.rows = json!({"not": "rows"});
        let err = renderer.render(&dashboard, &[], &window(0, 60)).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Interpolation(_)));
    }
}
