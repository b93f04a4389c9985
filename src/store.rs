//! Packet store client for the beam service's HTTP resource model.
//!
//! - `GET {base}/beams/{url}`: stream descriptors of the beam
//! - `GET {base}/beams/{url}/stream_{i}/{range}`: packet metadata of a window
//! - `GET {base}/beams/{url}/stream_{i}/packet_{pts}/data`: one payload

use beam_transcode::{
    packet::Packet,
    source::{PacketStore, RetrieveRequest},
    stream::StreamDescriptor,
};
use futures::future::BoxFuture;
use reqwest::Url;
use serde::Deserialize;

#[derive(Deserialize)]
struct BeamFormat {
    streams: Vec<StreamDescriptor>,
}

pub struct HttpStore {
    client: reqwest::Client,
    base: Url,
}

impl HttpStore {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| anyhow::anyhow!("invalid store url {:?}: {}", base_url, e))?;
        if base.cannot_be_a_base() {
            anyhow::bail!("store url {:?} cannot be a base", base_url);
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> anyhow::Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("store url cannot be a base"))?
            .pop_if_empty()
            .push("beams")
            .extend(segments);
        Ok(url)
    }

    async fn fetch_format(&self, url: &str) -> anyhow::Result<Vec<StreamDescriptor>> {
        let endpoint = self.endpoint(&[url])?;
        let format: BeamFormat = self
            .client
            .get(endpoint.clone())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("decode format from {}: {}", endpoint, e))?;
        Ok(format.streams)
    }

    async fn fetch_packets(&self, request: &RetrieveRequest) -> anyhow::Result<Vec<Packet>> {
        let stream = format!("stream_{}", request.stream_index);
        let window = request.window.to_string();
        let mut endpoint = self.endpoint(&[&request.url, &stream, &window])?;
        if request.flags != 0 {
            endpoint
                .query_pairs_mut()
                .append_pair("flags", &request.flags.to_string());
        }
        let packets: Vec<Packet> = self
            .client
            .get(endpoint)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let stream = &stream;
        let payloads = packets.into_iter().map(|packet| async move {
            let pts = packet.pts.or(packet.dts).unwrap_or(0);
            let resource = format!("packet_{}", pts);
            let endpoint = self.endpoint(&[&request.url, &stream, &resource, "data"])?;
            let data = self
                .client
                .get(endpoint)
                .send()
                .await?
                .error_for_status()?
                .bytes()
                .await?;
            Ok::<_, anyhow::Error>(Packet { data, ..packet })
        });
        let packets = futures::future::try_join_all(payloads).await?;
        log::debug!(
            "fetched {} packets of {} stream {} window {}",
            packets.len(),
            request.url,
            request.stream_index,
            request.window
        );
        Ok(packets)
    }
}

impl PacketStore for HttpStore {
    fn format<'a>(&'a self, url: &'a str) -> BoxFuture<'a, anyhow::Result<Vec<StreamDescriptor>>> {
        Box::pin(self.fetch_format(url))
    }

    fn retrieve<'a>(
        &'a self,
        request: &'a RetrieveRequest,
    ) -> BoxFuture<'a, anyhow::Result<Vec<Packet>>> {
        Box::pin(self.fetch_packets(request))
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;
