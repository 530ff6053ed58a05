//! Default broker class for eventing

use kube::api::DynamicObject;
use serde_json::Value;

use super::{Transformer, failure, object_at};
use crate::controller::error::Result;
use crate::manifest::{kind_of, name_of};

pub const BROKER_DEFAULTS_CONFIG: &str = "config-br-defaults";
pub const BROKER_DEFAULTS_KEY: &str = "default-br-config";

/// Sets `clusterDefault.brokerClass` in the broker defaults ConfigMap.
///
/// The value under [`BROKER_DEFAULTS_KEY`] is itself a YAML document; every
/// other setting in it is preserved.
pub struct DefaultBrokerClassTransform {
    broker_class: Option<String>,
}

impl DefaultBrokerClassTransform {
    pub fn new(broker_class: Option<&str>) -> Self {
        Self {
            broker_class: broker_class.filter(|c| !c.is_empty()).map(str::to_string),
        }
    }
}

impl Transformer for DefaultBrokerClassTransform {
    fn name(&self) -> &'static str {
        "default-broker-class"
    }

    fn transform(&self, obj: &mut DynamicObject) -> Result<()> {
        let Some(class) = &self.broker_class else {
            return Ok(());
        };
        if kind_of(obj) != "ConfigMap" || name_of(obj) != BROKER_DEFAULTS_CONFIG {
            return Ok(());
        }
        let fail = failure(self.name(), obj);

        let data = object_at(&mut obj.data, &["data"]).map_err(&fail)?;
        let mut config: Value = match data.get(BROKER_DEFAULTS_KEY) {
            None | Some(Value::Null) => Value::Null,
            Some(Value::String(raw)) => serde_yaml::from_str(raw)
                .map_err(|e| fail(format!("{BROKER_DEFAULTS_KEY} is not valid YAML: {e}")))?,
            Some(_) => return Err(fail(format!("{BROKER_DEFAULTS_KEY} is not a string"))),
        };

        let defaults = object_at(&mut config, &["clusterDefault"]).map_err(&fail)?;
        defaults.insert("brokerClass".to_string(), Value::String(class.clone()));

        let rendered = serde_yaml::to_string(&config)?;
        data.insert(BROKER_DEFAULTS_KEY.to_string(), Value::String(rendered));
        Ok(())
    }
}
