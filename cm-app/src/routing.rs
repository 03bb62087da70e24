use crate::config::{ChannelRouteConfig, ChannelsConfig};
use cm_chat::StreamInfo;
use cm_core::{RoutingConfig, RoutingResolver};
use std::collections::HashMap;

/// Channel routing table resolved from config. Matches by upstream channel
/// id first, then by display/short name, then falls through to the default
/// route flagged as unconfigured.
pub struct TableRoutingResolver {
    default_route: ChannelRouteConfig,
    routes: HashMap<String, ChannelRouteConfig>,
}

impl TableRoutingResolver {
    pub fn from_config(channels: &ChannelsConfig) -> Self {
        Self {
            default_route: channels.default.clone(),
            routes: channels.routes.clone(),
        }
    }

    fn find<'a>(&'a self, info: &'a StreamInfo) -> Option<(&'a str, &'a ChannelRouteConfig)> {
        if let Some(route) = self.routes.get(&info.channel_id) {
            return Some((info.channel_id.as_str(), route));
        }
        let wanted = info.channel_title.trim().to_lowercase();
        if wanted.is_empty() {
            return None;
        }
        self.routes.iter().find_map(|(channel_id, route)| {
            let name_match = route.name.to_lowercase().contains(&wanted);
            let short_match = route.short_name.eq_ignore_ascii_case(&info.channel_title);
            (name_match || short_match).then_some((channel_id.as_str(), route))
        })
    }
}

impl RoutingResolver for TableRoutingResolver {
    fn resolve(&self, info: &StreamInfo) -> RoutingConfig {
        match self.find(info) {
            Some((channel_id, route)) => RoutingConfig {
                channel_id: channel_id.to_string(),
                channel_name: route.name.clone(),
                short_name: route.short_name.clone(),
                sheet_id: route.sheet_id.clone(),
                lookback_seconds: route.lookback_seconds,
                auto_clip: route.auto_clip,
                configured: true,
            },
            None => {
                tracing::debug!(
                    channel_id = %info.channel_id,
                    channel_title = %info.channel_title,
                    "no routing entry for channel; using default route"
                );
                RoutingConfig {
                    channel_id: info.channel_id.clone(),
                    channel_name: self.default_route.name.clone(),
                    short_name: self.default_route.short_name.clone(),
                    sheet_id: self.default_route.sheet_id.clone(),
                    lookback_seconds: self.default_route.lookback_seconds,
                    auto_clip: self.default_route.auto_clip,
                    configured: false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::TableRoutingResolver;
    use crate::config::{ChannelRouteConfig, ChannelsConfig};
    use cm_chat::{StreamId, StreamInfo};
    use cm_core::RoutingResolver;
    use std::collections::HashMap;

    fn table() -> TableRoutingResolver {
        let mut routes = HashMap::new();
        routes.insert(
            "UC123".to_string(),
            ChannelRouteConfig {
                name: "TechWithJoshi".to_string(),
                short_name: "TWJ".to_string(),
                sheet_id: Some("sheet-twj".to_string()),
                lookback_seconds: Some(45),
                auto_clip: true,
            },
        );
        TableRoutingResolver::from_config(&ChannelsConfig {
            default: ChannelRouteConfig {
                sheet_id: Some("sheet-default".to_string()),
                ..ChannelRouteConfig::default()
            },
            routes,
        })
    }

    fn info(channel_id: &str, channel_title: &str) -> StreamInfo {
        StreamInfo {
            video_id: StreamId::new("vid-1"),
            live_chat_id: "chat-1".into(),
            title: "Launch stream".to_string(),
            channel_id: channel_id.to_string(),
            channel_title: channel_title.to_string(),
        }
    }

    #[test]
    fn resolves_by_channel_id_first() {
        let routing = table().resolve(&info("UC123", "Some Other Name"));
        assert!(routing.configured);
        assert_eq!(routing.channel_name, "TechWithJoshi");
        assert_eq!(routing.lookback_seconds, Some(45));
        assert_eq!(routing.sheet_id.as_deref(), Some("sheet-twj"));
    }

    #[test]
    fn falls_back_to_name_and_short_name_matches() {
        let by_name = table().resolve(&info("UCother", "techwithjoshi"));
        assert!(by_name.configured);
        assert_eq!(by_name.channel_id, "UC123");

        let by_short = table().resolve(&info("UCother", "twj"));
        assert!(by_short.configured);
        assert_eq!(by_short.short_name, "TWJ");
    }

    #[test]
    fn unknown_channel_gets_unconfigured_default() {
        let routing = table().resolve(&info("UCnope", "Somebody Else"));
        assert!(!routing.configured);
        assert_eq!(routing.channel_id, "UCnope");
        assert_eq!(routing.short_name, "DEF");
        assert_eq!(routing.sheet_id.as_deref(), Some("sheet-default"));
    }
}
