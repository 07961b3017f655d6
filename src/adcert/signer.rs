// src/adcert/signer.rs
//
// 发布方对外发竞价请求的签名：把请求里的固定字段集合拼成规范化消息，
// 对消息做 SHA-256 摘要后用 ECDSA P-256 签名，DER 编码 {R,S}。
// 需求方用发布方证书里的公钥验签，确认请求确实出自该发布方。

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey};

use crate::errors::AdCertError;
use crate::openrtb::request::BidRequest;

pub struct AdCertSigner {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    /// 发布方证书版本，出现在规范化消息的 `cert` 键里
    pcv: String,
    /// 公钥 PEM 原文，证书下载端点直接返回它
    public_pem: String,
}

impl AdCertSigner {
    pub fn new(signing_key: SigningKey, pcv: impl Into<String>, public_pem: impl Into<String>) -> Self {
        let verifying_key = signing_key.verifying_key().clone();
        Self {
            signing_key,
            verifying_key,
            pcv: pcv.into(),
            public_pem: public_pem.into(),
        }
    }

    /// 从 PEM 文件加载密钥对。加载失败由调用方决定是否终止进程，
    /// 正常部署下配置了 ad-cert 就必须加载成功。
    pub fn from_pem_files(
        pcv: &str,
        private_key_path: impl AsRef<Path>,
        public_key_path: impl AsRef<Path>,
    ) -> Result<Self, AdCertError> {
        let private_pem = fs::read_to_string(private_key_path.as_ref())
            .map_err(|e| AdCertError::Key(format!("read private key: {}", e)))?;
        let public_pem = fs::read_to_string(public_key_path.as_ref())
            .map_err(|e| AdCertError::Key(format!("read public key: {}", e)))?;

        // PKCS#8 优先，SEC1（"EC PRIVATE KEY"）兜底
        let signing_key = SigningKey::from_pkcs8_pem(&private_pem)
            .or_else(|_| {
                p256::SecretKey::from_sec1_pem(&private_pem).map(SigningKey::from)
            })
            .map_err(|e| AdCertError::Key(format!("parse private key: {}", e)))?;
        let verifying_key = VerifyingKey::from_public_key_pem(&public_pem)
            .map_err(|e| AdCertError::Key(format!("parse public key: {}", e)))?;

        Ok(Self {
            signing_key,
            verifying_key,
            pcv: pcv.to_string(),
            public_pem,
        })
    }

    pub fn public_certificate(&self) -> &str {
        &self.public_pem
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    /// 构造规范化消息：固定键集合按字典序排列，`k=v` 用 `&` 连接。
    /// 所有键永远在场，取不到的值留空；不做任何 URL 编码。
    pub fn canonical_message(request: &BidRequest, pcv: &str) -> String {
        let mut bundle = String::new();
        let mut domain = String::new();
        let (mut ip, mut ipv6, mut ifa, mut ua) =
            (String::new(), String::new(), String::new(), String::new());
        if let Some(app) = &request.app {
            bundle = app.bundle.clone().unwrap_or_default();
        }
        if let Some(site) = &request.site {
            domain = site.domain.clone().unwrap_or_default();
        }
        if let Some(device) = &request.device {
            ip = device.ip.clone().unwrap_or_default();
            ipv6 = device.ipv6.clone().unwrap_or_default();
            ifa = device.ifa.clone().unwrap_or_default();
            ua = device.ua.clone().unwrap_or_default();
        }

        let mut fields = BTreeMap::new();
        fields.insert("tid", request.id.clone());
        fields.insert("cert", format!("ads-cert.{}.txt", pcv));
        fields.insert("domain", domain);
        fields.insert("bundle", bundle);
        fields.insert("consent", String::new());
        fields.insert("ft", "d".to_string());
        fields.insert("ip", ip);
        fields.insert("ipv6", ipv6);
        fields.insert("ifa", ifa);
        fields.insert("ua", ua);
        fields.insert("w", String::new());
        fields.insert("h", String::new());

        fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// 对消息签名，返回 DER 编码的 {R,S}。
    pub fn sign(&self, msg: &str) -> Result<Vec<u8>, AdCertError> {
        let signature: Signature = self
            .signing_key
            .try_sign(msg.as_bytes())
            .map_err(|e| AdCertError::Sign(e.to_string()))?;
        Ok(signature.to_der().as_bytes().to_vec())
    }

    /// 给一份外发请求生成并打上签名（`ps`/`pcv` 字段），返回规范化消息。
    pub fn sign_request(&self, request: &mut BidRequest) -> Result<String, AdCertError> {
        let msg = Self::canonical_message(request, &self.pcv);
        let sig = self.sign(&msg)?;
        request.pcv = Some(self.pcv.clone());
        request.ps = Some(BASE64.encode(sig));
        Ok(msg)
    }

    pub fn verify(&self, msg: &str, signature: &[u8]) -> Result<(), AdCertError> {
        Self::verify_with_key(&self.verifying_key, msg, signature)
    }

    /// DER 解码失败与验签失败是两种错误：前者说明签名本身坏掉了，
    /// 后者说明消息或密钥对不上。
    pub fn verify_with_key(
        key: &VerifyingKey,
        msg: &str,
        signature: &[u8],
    ) -> Result<(), AdCertError> {
        let signature =
            Signature::from_der(signature).map_err(|e| AdCertError::Der(e.to_string()))?;
        key.verify(msg.as_bytes(), &signature)
            .map_err(|_| AdCertError::InvalidSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openrtb::request::{App, Device, Imp, Site};
    use proptest::prelude::*;

    fn test_signer() -> AdCertSigner {
        // 固定标量，测试保持确定性
        let bytes: Vec<u8> = (1u8..=32).collect();
        let signing_key = SigningKey::from_slice(&bytes).unwrap();
        AdCertSigner::new(signing_key, "a:180802:1808020000", "")
    }

    fn test_request() -> BidRequest {
        BidRequest {
            id: "94d8a111-c232-4b38-a4ac-f6aa213e4a80".to_string(),
            imp: vec![Imp {
                id: "1".to_string(),
                bidfloor: Some(3.5),
                secure: Some(0),
                ..Default::default()
            }],
            site: Some(Site {
                domain: Some("example.com".to_string()),
                ..Default::default()
            }),
            device: Some(Device {
                ip: Some("162.0.0.254".to_string()),
                ua: Some("Mozilla/5.0 (Windows NT 6.1; WOW64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/44.0.2403.130 Safari/537.36".to_string()),
                ..Default::default()
            }),
            at: Some(2),
            ..Default::default()
        }
    }

    #[test]
    fn canonical_message_layout() {
        let msg = AdCertSigner::canonical_message(&test_request(), "a:180802:1808020000");
        assert_eq!(
            msg,
            "bundle=&cert=ads-cert.a:180802:1808020000.txt&consent=&domain=example.com&ft=d&h=&ifa=&ip=162.0.0.254&ipv6=&tid=94d8a111-c232-4b38-a4ac-f6aa213e4a80&ua=Mozilla/5.0 (Windows NT 6.1; WOW64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/44.0.2403.130 Safari/537.36&w="
        );
    }

    #[test]
    fn canonical_message_is_deterministic() {
        let request = test_request();
        let a = AdCertSigner::canonical_message(&request, "a:180802:1808020000");
        let b = AdCertSigner::canonical_message(&request, "a:180802:1808020000");
        assert_eq!(a, b);
    }

    #[test]
    fn canonical_message_ignores_unlisted_fields() {
        let mut request = test_request();
        let before = AdCertSigner::canonical_message(&request, "v1");
        request.at = Some(1);
        request.tmax = Some(700);
        request.imp[0].bidfloor = Some(9.9);
        let after = AdCertSigner::canonical_message(&request, "v1");
        assert_eq!(before, after);
    }

    #[test]
    fn canonical_message_app_bundle() {
        let mut request = test_request();
        request.site = None;
        request.app = Some(App {
            bundle: Some("com.example.app".to_string()),
            ..Default::default()
        });
        let msg = AdCertSigner::canonical_message(&request, "v1");
        assert!(msg.starts_with("bundle=com.example.app&cert=ads-cert.v1.txt&"));
        assert!(msg.contains("&domain=&"));
    }

    #[test]
    fn sign_and_verify_round_trip() {
        let signer = test_signer();
        let mut request = test_request();
        let msg = signer.sign_request(&mut request).unwrap();

        assert_eq!(request.pcv.as_deref(), Some("a:180802:1808020000"));
        let sig = BASE64.decode(request.ps.as_deref().unwrap()).unwrap();
        signer.verify(&msg, &sig).unwrap();
    }

    #[test]
    fn verify_rejects_tampered_message() {
        let signer = test_signer();
        let msg = AdCertSigner::canonical_message(&test_request(), "a:180802:1808020000");
        let sig = signer.sign(&msg).unwrap();

        let mut tampered = test_request();
        tampered.device.as_mut().unwrap().ip = Some("10.0.0.1".to_string());
        let tampered_msg = AdCertSigner::canonical_message(&tampered, "a:180802:1808020000");
        assert_ne!(msg, tampered_msg);

        let err = signer.verify(&tampered_msg, &sig).unwrap_err();
        assert!(matches!(err, AdCertError::InvalidSignature));
    }

    #[test]
    fn verify_distinguishes_malformed_der() {
        let signer = test_signer();
        let err = signer.verify("whatever", b"not a der signature").unwrap_err();
        assert!(matches!(err, AdCertError::Der(_)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]
        #[test]
        fn round_trip_for_arbitrary_messages(msg in "[ -~]{0,64}") {
            let signer = test_signer();
            let sig = signer.sign(&msg).unwrap();
            prop_assert!(signer.verify(&msg, &sig).is_ok());
            let other = format!("{}x", msg);
            prop_assert!(signer.verify(&other, &sig).is_err());
        }
    }
}
