use crate::model::{DiscoveredStream, StreamType};
use anyhow::{Result, anyhow};
use base64::Engine;
use rand::RngCore;
use sha1::{Digest, Sha1};
use std::time::Duration;
use tracing::debug;

/// Ports tried for the device service, most common first.
const ONVIF_PORTS: &[u16] = &[80, 8080, 8000];
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Stream paths seen across the long tail of RTSP firmwares.
const RTSP_FALLBACK_PATHS: &[&str] = &[
    "/",
    "/1",
    "/2",
    "/11",
    "/12",
    "/live",
    "/live/ch0",
    "/live/ch1",
    "/live/main",
    "/live/sub",
    "/live.sdp",
    "/live/av0",
    "/av0_0",
    "/av0_1",
    "/ch0_0.h264",
    "/ch0_1.h264",
    "/h264/ch1/main/av_stream",
    "/h264/ch1/sub/av_stream",
    "/Streaming/Channels/101",
    "/Streaming/Channels/102",
    "/cam/realmonitor?channel=1&subtype=0",
    "/cam/realmonitor?channel=1&subtype=1",
    "/videoMain",
    "/videoSub",
    "/media/video1",
    "/media/video2",
    "/profile1",
    "/profile2",
    "/stream1",
    "/stream2",
];

/// Snapshot endpoints worth a blind try over HTTP.
const HTTP_FALLBACK_PATHS: &[&str] = &[
    "/snapshot.jpg",
    "/snapshot.cgi",
    "/image.jpg",
    "/jpg/image.jpg",
    "/cgi-bin/snapshot.cgi",
    "/axis-cgi/jpg/image.cgi",
    "/onvif/snapshot",
    "/tmpfs/auto.jpg",
    "/webcapture.jpg?command=snap&channel=1",
    "/cgi-bin/currentpic.cgi",
];

/// Protocol-level device interrogation seam; the scanner is generic over
/// it so tests can run without a camera on the network.
pub trait DeviceDiscovery: Send + Sync {
    fn discover(
        &self,
        ip: &str,
        username: &str,
        password: &str,
    ) -> impl std::future::Future<Output = Vec<DiscoveredStream>> + Send;
}

pub struct OnvifProber {
    client: reqwest::Client,
}

impl DeviceDiscovery for OnvifProber {
    async fn discover(&self, ip: &str, username: &str, password: &str) -> Vec<DiscoveredStream> {
        self.discover_streams(ip, username, password).await
    }
}

impl Default for OnvifProber {
    fn default() -> Self {
        Self::new()
    }
}

impl OnvifProber {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(ATTEMPT_TIMEOUT)
            .danger_accept_invalid_certs(true)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Interrogate the device service for profile stream URIs and always
    /// append the curated fallback paths. A dead or auth-rejecting ONVIF
    /// endpoint only costs us the profile harvest; it never fails the scan.
    pub async fn discover_streams(
        &self,
        ip: &str,
        username: &str,
        password: &str,
    ) -> Vec<DiscoveredStream> {
        let host = ip.split(':').next().unwrap_or(ip).to_string();
        let mut out = Vec::new();

        match self.harvest_profiles(&host, username, password).await {
            Ok((port, mut streams)) => {
                let endpoint = format!("http://{host}:{port}/onvif/device_service");
                let mut device = DiscoveredStream::new(endpoint, StreamType::Onvif, "onvif", port);
                // The device service itself answered, so it is usable for
                // control (PTZ) as-is; it is not media and is never probed.
                device.working = true;
                device
                    .metadata
                    .insert("onvif".to_string(), "device_service".to_string());
                out.push(device);
                out.append(&mut streams);
            }
            Err(err) => {
                debug!(host = %host, error = %err, "onvif interrogation failed; falling back to common paths");
            }
        }

        out.extend(fallback_streams(&host, username, password));
        out
    }

    async fn harvest_profiles(
        &self,
        host: &str,
        username: &str,
        password: &str,
    ) -> Result<(u16, Vec<DiscoveredStream>)> {
        let mut last_err = anyhow!("no onvif ports attempted");

        for &port in ONVIF_PORTS {
            let endpoint = format!("http://{host}:{port}/onvif/device_service");
            match self.get_profiles(&endpoint, username, password).await {
                Ok(profiles) => {
                    debug!(endpoint = %endpoint, profiles = profiles.len(), "onvif device service answered");
                    let mut streams = Vec::new();
                    for profile in profiles {
                        match self
                            .get_stream_uri(&endpoint, &profile.token, username, password)
                            .await
                        {
                            Ok(uri) => {
                                let uri = embed_rtsp_credentials(&uri, username, password);
                                let port = rtsp_port(&uri);
                                let mut stream =
                                    DiscoveredStream::new(uri, StreamType::Ffmpeg, "rtsp", port);
                                stream
                                    .metadata
                                    .insert("onvif_profile".to_string(), profile.token.clone());
                                if !profile.name.is_empty() {
                                    stream
                                        .metadata
                                        .insert("onvif_profile_name".to_string(), profile.name.clone());
                                }
                                streams.push(stream);
                            }
                            Err(err) => {
                                debug!(profile = %profile.token, error = %err, "GetStreamUri failed");
                            }
                        }
                    }
                    return Ok((port, streams));
                }
                Err(err) => {
                    debug!(endpoint = %endpoint, error = %err, "onvif attempt failed");
                    last_err = err;
                }
            }
        }

        Err(last_err)
    }

    async fn get_profiles(
        &self,
        endpoint: &str,
        username: &str,
        password: &str,
    ) -> Result<Vec<Profile>> {
        let body = r#"<GetProfiles xmlns="http://www.onvif.org/ver10/media/wsdl"/>"#;
        let xml = self
            .soap_call(
                endpoint,
                "http://www.onvif.org/ver10/media/wsdl/GetProfiles",
                body,
                username,
                password,
            )
            .await?;
        parse_profiles(&xml)
    }

    async fn get_stream_uri(
        &self,
        endpoint: &str,
        token: &str,
        username: &str,
        password: &str,
    ) -> Result<String> {
        let body = format!(
            r#"<GetStreamUri xmlns="http://www.onvif.org/ver10/media/wsdl">
  <StreamSetup>
    <Stream xmlns="http://www.onvif.org/ver10/schema">RTP-Unicast</Stream>
    <Transport xmlns="http://www.onvif.org/ver10/schema">
      <Protocol>RTSP</Protocol>
    </Transport>
  </StreamSetup>
  <ProfileToken>{token}</ProfileToken>
</GetStreamUri>"#
        );
        let xml = self
            .soap_call(
                endpoint,
                "http://www.onvif.org/ver10/media/wsdl/GetStreamUri",
                &body,
                username,
                password,
            )
            .await?;
        parse_stream_uri(&xml).ok_or_else(|| anyhow!("no MediaUri in GetStreamUriResponse"))
    }

    async fn soap_call(
        &self,
        endpoint: &str,
        action: &str,
        body: &str,
        username: &str,
        password: &str,
    ) -> Result<String> {
        let envelope = build_envelope(username, password, body);
        let response = self
            .client
            .post(endpoint)
            .header(
                "Content-Type",
                format!(r#"application/soap+xml; charset=utf-8; action="{action}""#),
            )
            .body(envelope)
            .send()
            .await?;

        let status = response.status();
        let xml = response.text().await?;
        if !status.is_success() {
            return Err(anyhow!("device service returned {status}"));
        }
        if let Some(fault) = parse_fault(&xml) {
            return Err(anyhow!("soap fault: {fault}"));
        }
        Ok(xml)
    }
}

#[derive(Clone, Debug)]
struct Profile {
    token: String,
    name: String,
}

fn build_envelope(username: &str, password: &str, body: &str) -> String {
    let security = if username.is_empty() && password.is_empty() {
        String::new()
    } else {
        security_header(username, password)
    };

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope">
  <s:Header>
    <wsa:MessageID xmlns:wsa="http://schemas.xmlsoap.org/ws/2004/08/addressing">urn:uuid:{}</wsa:MessageID>
    {}
  </s:Header>
  <s:Body>
    {}
  </s:Body>
</s:Envelope>"#,
        uuid::Uuid::new_v4(),
        security,
        body
    )
}

/// WS-Security UsernameToken with a SHA-1 password digest over
/// nonce + created + password.
fn security_header(username: &str, password: &str) -> String {
    let mut nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);
    let created = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();

    let mut hasher = Sha1::new();
    hasher.update(nonce);
    hasher.update(created.as_bytes());
    hasher.update(password.as_bytes());
    let digest = base64::engine::general_purpose::STANDARD.encode(hasher.finalize());
    let nonce = base64::engine::general_purpose::STANDARD.encode(nonce);

    format!(
        r#"<wsse:Security xmlns:wsse="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd" xmlns:wsu="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd">
      <wsse:UsernameToken>
        <wsse:Username>{username}</wsse:Username>
        <wsse:Password Type="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordDigest">{digest}</wsse:Password>
        <wsse:Nonce EncodingType="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-soap-message-security-1.0#Base64Binary">{nonce}</wsse:Nonce>
        <wsu:Created>{created}</wsu:Created>
      </wsse:UsernameToken>
    </wsse:Security>"#
    )
}

fn parse_profiles(xml: &str) -> Result<Vec<Profile>> {
    let doc = roxmltree::Document::parse(xml)?;
    let mut out = Vec::new();
    for node in doc.descendants().filter(|n| n.tag_name().name() == "Profiles") {
        let Some(token) = node.attribute("token") else {
            continue;
        };
        let name = node
            .attribute("Name")
            .map(str::to_string)
            .or_else(|| {
                node.children()
                    .find(|c| c.tag_name().name() == "Name")
                    .and_then(|c| c.text())
                    .map(str::to_string)
            })
            .unwrap_or_default();
        out.push(Profile {
            token: token.to_string(),
            name,
        });
    }

    if out.is_empty() {
        return Err(anyhow!("no Profiles in GetProfilesResponse"));
    }
    Ok(out)
}

fn parse_stream_uri(xml: &str) -> Option<String> {
    let doc = roxmltree::Document::parse(xml).ok()?;
    let media_uri = doc
        .descendants()
        .find(|n| n.tag_name().name() == "MediaUri")?;
    let uri = media_uri
        .descendants()
        .find(|n| n.tag_name().name() == "Uri")?
        .text()?
        .trim();
    (!uri.is_empty()).then(|| uri.to_string())
}

fn parse_fault(xml: &str) -> Option<String> {
    let doc = roxmltree::Document::parse(xml).ok()?;
    let fault = doc.descendants().find(|n| n.tag_name().name() == "Fault")?;
    let reason = fault
        .descendants()
        .filter_map(|n| n.text())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    Some(if reason.is_empty() { "unspecified".to_string() } else { reason })
}

/// Profile URIs come back bare; the probe expects credentials embedded.
fn embed_rtsp_credentials(uri: &str, username: &str, password: &str) -> String {
    if username.is_empty() && password.is_empty() {
        return uri.to_string();
    }
    let Some(rest) = uri.strip_prefix("rtsp://") else {
        return uri.to_string();
    };
    if rest.contains('@') {
        return uri.to_string();
    }
    format!("rtsp://{username}:{password}@{rest}")
}

fn rtsp_port(uri: &str) -> u16 {
    uri.strip_prefix("rtsp://")
        .and_then(|rest| {
            let authority = rest.split('/').next().unwrap_or(rest);
            let host_port = authority.rsplit_once('@').map(|(_, hp)| hp).unwrap_or(authority);
            host_port.rsplit_once(':').and_then(|(_, p)| p.parse().ok())
        })
        .unwrap_or(554)
}

fn fallback_streams(host: &str, username: &str, password: &str) -> Vec<DiscoveredStream> {
    let mut out = Vec::with_capacity(RTSP_FALLBACK_PATHS.len() + HTTP_FALLBACK_PATHS.len());

    let userinfo = if username.is_empty() && password.is_empty() {
        String::new()
    } else {
        format!("{username}:{password}@")
    };

    for path in RTSP_FALLBACK_PATHS {
        let url = format!("rtsp://{userinfo}{host}{path}");
        let mut stream = DiscoveredStream::new(url, StreamType::Ffmpeg, "rtsp", 554);
        stream.metadata.insert("source".to_string(), "fallback".to_string());
        out.push(stream);
    }

    for path in HTTP_FALLBACK_PATHS {
        // HTTP fallbacks keep the URL clean; the scanner hands credentials
        // to the probe from metadata.
        let url = format!("http://{host}{path}");
        let mut stream = DiscoveredStream::new(url, StreamType::Jpeg, "http", 80);
        stream.metadata.insert("source".to_string(), "fallback".to_string());
        if !username.is_empty() || !password.is_empty() {
            stream.metadata.insert("username".to_string(), username.to_string());
            stream.metadata.insert("password".to_string(), password.to_string());
        }
        out.push(stream);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope">
  <env:Body>
    <trt:GetProfilesResponse xmlns:trt="http://www.onvif.org/ver10/media/wsdl" xmlns:tt="http://www.onvif.org/ver10/schema">
      <trt:Profiles token="Profile_1" fixed="true">
        <tt:Name>mainStream</tt:Name>
      </trt:Profiles>
      <trt:Profiles token="Profile_2" Name="subStream"/>
    </trt:GetProfilesResponse>
  </env:Body>
</env:Envelope>"#;

    const STREAM_URI_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope">
  <env:Body>
    <trt:GetStreamUriResponse xmlns:trt="http://www.onvif.org/ver10/media/wsdl" xmlns:tt="http://www.onvif.org/ver10/schema">
      <trt:MediaUri>
        <tt:Uri>rtsp://192.168.1.64:554/Streaming/Channels/101</tt:Uri>
      </trt:MediaUri>
    </trt:GetStreamUriResponse>
  </env:Body>
</env:Envelope>"#;

    #[test]
    fn parses_profile_tokens_and_names() {
        let profiles = parse_profiles(PROFILES_XML).unwrap();
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].token, "Profile_1");
        assert_eq!(profiles[0].name, "mainStream");
        assert_eq!(profiles[1].token, "Profile_2");
        assert_eq!(profiles[1].name, "subStream");
    }

    #[test]
    fn parses_stream_uri() {
        assert_eq!(
            parse_stream_uri(STREAM_URI_XML).unwrap(),
            "rtsp://192.168.1.64:554/Streaming/Channels/101"
        );
        assert!(parse_stream_uri("<a/>").is_none());
    }

    #[test]
    fn detects_soap_fault() {
        let xml = r#"<e:Envelope xmlns:e="http://www.w3.org/2003/05/soap-envelope"><e:Body><e:Fault><e:Reason><e:Text>not authorized</e:Text></e:Reason></e:Fault></e:Body></e:Envelope>"#;
        assert_eq!(parse_fault(xml).unwrap(), "not authorized");
        assert!(parse_fault(PROFILES_XML).is_none());
    }

    #[test]
    fn security_header_contains_digest_and_nonce() {
        let header = security_header("admin", "secret");
        assert!(header.contains("<wsse:Username>admin</wsse:Username>"));
        assert!(header.contains("PasswordDigest"));
        assert!(header.contains("<wsse:Nonce"));
        // Digest must never be the raw password.
        assert!(!header.contains(">secret<"));
    }

    #[test]
    fn envelope_skips_security_without_credentials() {
        let env = build_envelope("", "", "<x/>");
        assert!(!env.contains("wsse:Security"));
        let env = build_envelope("admin", "pw", "<x/>");
        assert!(env.contains("wsse:Security"));
    }

    #[test]
    fn embeds_credentials_in_harvested_uri() {
        assert_eq!(
            embed_rtsp_credentials("rtsp://10.0.0.2:554/live", "admin", "pw"),
            "rtsp://admin:pw@10.0.0.2:554/live"
        );
        assert_eq!(
            embed_rtsp_credentials("rtsp://u:p@10.0.0.2/live", "admin", "pw"),
            "rtsp://u:p@10.0.0.2/live"
        );
        assert_eq!(embed_rtsp_credentials("rtsp://10.0.0.2/live", "", ""), "rtsp://10.0.0.2/live");
    }

    #[test]
    fn rtsp_port_extraction() {
        assert_eq!(rtsp_port("rtsp://10.0.0.2:8554/live"), 8554);
        assert_eq!(rtsp_port("rtsp://u:p@10.0.0.2:8554/live"), 8554);
        assert_eq!(rtsp_port("rtsp://10.0.0.2/live"), 554);
    }

    #[test]
    fn fallback_lists_cover_both_transports() {
        let streams = fallback_streams("10.0.0.2", "admin", "pw");
        let rtsp = streams.iter().filter(|s| s.protocol == "rtsp").count();
        let http = streams.iter().filter(|s| s.protocol == "http").count();
        assert!(rtsp >= 25, "{rtsp}");
        assert!(http >= 10, "{http}");

        for s in &streams {
            assert!(!s.working);
            match s.protocol.as_str() {
                "rtsp" => assert!(s.url.starts_with("rtsp://admin:pw@10.0.0.2")),
                _ => {
                    assert!(!s.url.contains('@'));
                    assert_eq!(s.metadata.get("username").unwrap(), "admin");
                }
            }
        }
    }

    #[test]
    fn host_strip_keeps_bare_ip() {
        let streams = fallback_streams("192.168.1.5", "", "");
        assert!(streams[0].url.contains("192.168.1.5"));
        assert!(!streams[0].url.contains('@'));
    }
}
