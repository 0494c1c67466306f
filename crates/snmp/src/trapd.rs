//! snmptrapd 설정 모델과 설정 파일 생성기
//!
//! 외부 snmptrapd 프로세스에 줄 설정 파일을 만듭니다. `format1`/
//! `format2` 줄이 프레이머가 기대하는 구분 레코드 형식을 정의합니다.

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SnmpError;
use crate::framer::DEFAULT_BUFFER_SIZE;

/// snmptrapd PID 파일 경로 (컨테이너 이미지와 약속된 위치)
pub const PID_FILE_PATH: &str = "/var/run/snmptrapd/snmptrapd.pid";

/// v3 사용자 인증 해시
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthType {
    /// SHA-1 (기본값)
    #[default]
    #[serde(rename = "sha", alias = "sha-128")]
    Sha,
    #[serde(rename = "md5")]
    Md5,
    #[serde(rename = "sha-224")]
    Sha224,
    #[serde(rename = "sha-256")]
    Sha256,
    #[serde(rename = "sha-384")]
    Sha384,
    #[serde(rename = "sha-512")]
    Sha512,
}

impl AuthType {
    /// net-snmp CLI가 기대하는 표기를 반환합니다.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Sha => "SHA",
            Self::Sha224 => "SHA-224",
            Self::Sha256 => "SHA-256",
            Self::Sha384 => "SHA-384",
            Self::Sha512 => "SHA-512",
        }
    }
}

/// v3 사용자 암호화 프로토콜
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrivacyProtocol {
    /// AES-128 (기본값)
    #[default]
    #[serde(rename = "aes", alias = "aes-128")]
    Aes,
    #[serde(rename = "des")]
    Des,
    #[serde(rename = "aes-192")]
    Aes192,
    #[serde(rename = "aes-256")]
    Aes256,
}

impl PrivacyProtocol {
    /// net-snmp CLI가 기대하는 표기를 반환합니다.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Des => "DES",
            Self::Aes => "AES",
            Self::Aes192 => "AES-192",
            Self::Aes256 => "AES-256",
        }
    }
}

/// SNMP v3 사용자
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub username: String,
    /// 인증 없이 수신 허용 (authUser noauth)
    pub no_auth: bool,
    /// 암호화까지 요구 (authUser priv)
    pub require_privacy: bool,
    pub engine_id: String,
    pub auth_type: AuthType,
    pub auth_passphrase: String,
    pub privacy_protocol: PrivacyProtocol,
    pub privacy_passphrase: String,
}

impl User {
    /// passphrase 존재 여부로 보안 수준을 결정합니다.
    pub fn security_level(&self) -> &'static str {
        if self.auth_passphrase.is_empty() {
            "noAuthNoPriv"
        } else if self.privacy_passphrase.is_empty() {
            "authNoPriv"
        } else {
            "authPriv"
        }
    }
}

/// v1/v2c community
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Community {
    pub name: String,
}

/// 수신 인증 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// v1/v2 인증 활성화. v3는 enable과 무관하게 user 정의가 필요.
    pub enable: bool,
    /// v1/v2 community 목록
    pub community: Vec<Community>,
    /// v3 사용자 목록
    pub user: Vec<User>,
}

/// snmptrapd 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrapdConfig {
    pub auth: AuthConfig,
    /// 바인드 문자열 목록 (예: `udp:10162`)
    pub listening: Vec<String>,
    /// 생성 파일 끝에 그대로 붙는 추가 설정
    pub additional_config: String,
    pub magic_begin: String,
    pub magic_end: String,
    /// `N`, `Nk`, `Nm`, `Ng` 형식의 스캔 버퍼 크기
    pub buffer_size: String,
}

impl Default for TrapdConfig {
    fn default() -> Self {
        Self {
            auth: AuthConfig::default(),
            listening: vec!["udp:10162".to_owned(), "udp6:10162".to_owned()],
            additional_config: String::new(),
            magic_begin: "--TFWDBEGIN--".to_owned(),
            magic_end: "--TFWDEND--".to_owned(),
            buffer_size: "64k".to_owned(),
        }
    }
}

impl TrapdConfig {
    /// buffer_size 문자열을 바이트 수로 해석합니다.
    ///
    /// 십진 배수(k=1e3, m=1e6, g=1e9)를 쓰며, t 이상은 실수로 간주하여
    /// 거부합니다. 실패 시 호출자는 [`DEFAULT_BUFFER_SIZE`]로
    /// 폴백합니다.
    pub fn parse_buffer_size(&self) -> Result<usize, SnmpError> {
        let text = self.buffer_size.trim();
        if text.is_empty() {
            return Err(SnmpError::BufferSize("empty buffer size".to_owned()));
        }
        let last = text
            .chars()
            .last()
            .expect("non-empty text")
            .to_ascii_lowercase();
        let (number, multiplier) = match last {
            'k' => (&text[..text.len() - 1], 1_000),
            'm' => (&text[..text.len() - 1], 1_000_000),
            'g' => (&text[..text.len() - 1], 1_000_000_000),
            't' | 'p' | 'e' => {
                return Err(SnmpError::BufferSize(
                    "buffer_size too large, probably a mistake".to_owned(),
                ));
            }
            _ => (text, 1),
        };
        let parsed: usize = number
            .parse()
            .map_err(|e| SnmpError::BufferSize(format!("failed reading buffer_size: {e}")))?;
        Ok(parsed * multiplier)
    }

    /// buffer_size를 해석하되 실패 시 기본값으로 폴백합니다.
    pub fn buffer_size_or_default(&self) -> usize {
        match self.parse_buffer_size() {
            Ok(size) => size,
            Err(e) => {
                tracing::warn!(error = %e, "failed parsing snmptrapd.buffer_size");
                DEFAULT_BUFFER_SIZE
            }
        }
    }

    /// snmptrapd 설정 파일 내용을 렌더링합니다.
    pub fn render(&self) -> Result<String, SnmpError> {
        // snmptrapd는 개행마다 stdout을 플러시하므로 format 끝에 \n을
        // 붙여 메시지 단위 플러시를 보장
        let mut out = format!(
            "pidFile {PID_FILE_PATH}\n\
             format1 {begin}%a|%b|%t|%T|%W|%N|%P|%w|%q|%v{end}\\n\n\
             format2 {begin}%a|%b|%t|%T|%W|%N|%P|%w|%q|%v{end}\\n\n",
            begin = self.magic_begin,
            end = self.magic_end,
        );
        if !self.listening.is_empty() {
            out.push_str(&format!("snmpTrapdAddr {}\n", self.listening.join(" ")));
        }
        if !self.auth.enable {
            out.push_str("disableAuthorization yes\n");
        } else {
            for community in &self.auth.community {
                out.push_str(&format!("authCommunity log {}\n", community.name));
            }
        }
        for user in &self.auth.user {
            let mut line = vec!["createUser".to_owned()];
            if !user.engine_id.is_empty() {
                line.push("-e".to_owned());
                line.push(user.engine_id.clone());
            }
            if user.username.is_empty() {
                return Err(SnmpError::Generate("empty username".to_owned()));
            }
            line.push(user.username.clone());
            line.push(user.auth_type.as_str().to_owned());
            if user.auth_passphrase.is_empty() {
                return Err(SnmpError::Generate("empty auth_passphrase".to_owned()));
            }
            line.push(format!("{:?}", user.auth_passphrase));
            line.push(user.privacy_protocol.as_str().to_owned());
            if !user.privacy_passphrase.is_empty() {
                line.push(format!("{:?}", user.privacy_passphrase));
            }
            out.push_str(&format!("{}\n", line.join(" ")));
            if user.require_privacy {
                out.push_str(&format!("authUser log {} priv\n", user.username));
            } else if user.no_auth {
                out.push_str(&format!("authUser log {} noauth\n", user.username));
            } else {
                out.push_str(&format!("authUser log {}\n", user.username));
            }
        }
        out.push_str(&self.additional_config);
        Ok(out)
    }

    /// 설정 파일을 원자적으로 씁니다 (임시 파일 + rename).
    pub fn serialize(&self, path: &Path) -> Result<(), SnmpError> {
        let content = self.render()?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(path)
            .map_err(|e| SnmpError::Generate(format!("failed writing {}: {e}", path.display())))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_buffer(size: &str) -> TrapdConfig {
        TrapdConfig {
            buffer_size: size.to_owned(),
            ..Default::default()
        }
    }

    #[test]
    fn buffer_size_suffixes() {
        assert_eq!(config_with_buffer("64k").parse_buffer_size().unwrap(), 64_000);
        assert_eq!(config_with_buffer("2m").parse_buffer_size().unwrap(), 2_000_000);
        assert_eq!(config_with_buffer("1g").parse_buffer_size().unwrap(), 1_000_000_000);
        assert_eq!(config_with_buffer("1234").parse_buffer_size().unwrap(), 1_234);
    }

    #[test]
    fn buffer_size_refuses_terabytes() {
        assert!(config_with_buffer("1t").parse_buffer_size().is_err());
        assert!(config_with_buffer("1p").parse_buffer_size().is_err());
        assert!(config_with_buffer("1e").parse_buffer_size().is_err());
    }

    #[test]
    fn buffer_size_fallback() {
        assert_eq!(
            config_with_buffer("bogus").buffer_size_or_default(),
            DEFAULT_BUFFER_SIZE
        );
        assert_eq!(config_with_buffer("").buffer_size_or_default(), DEFAULT_BUFFER_SIZE);
    }

    #[test]
    fn render_default_config() {
        let rendered = TrapdConfig::default().render().unwrap();
        assert!(rendered.contains("pidFile /var/run/snmptrapd/snmptrapd.pid"));
        assert!(rendered
            .contains("format1 --TFWDBEGIN--%a|%b|%t|%T|%W|%N|%P|%w|%q|%v--TFWDEND--\\n"));
        assert!(rendered.contains("format2 --TFWDBEGIN--"));
        assert!(rendered.contains("snmpTrapdAddr udp:10162 udp6:10162"));
        assert!(rendered.contains("disableAuthorization yes"));
    }

    #[test]
    fn render_auth_communities() {
        let config = TrapdConfig {
            auth: AuthConfig {
                enable: true,
                community: vec![
                    Community { name: "public".to_owned() },
                    Community { name: "ops".to_owned() },
                ],
                user: Vec::new(),
            },
            ..Default::default()
        };
        let rendered = config.render().unwrap();
        assert!(rendered.contains("authCommunity log public"));
        assert!(rendered.contains("authCommunity log ops"));
        assert!(!rendered.contains("disableAuthorization"));
    }

    #[test]
    fn render_v3_users() {
        let config = TrapdConfig {
            auth: AuthConfig {
                enable: true,
                community: Vec::new(),
                user: vec![
                    User {
                        username: "traptest".to_owned(),
                        auth_type: AuthType::Sha256,
                        auth_passphrase: "authpass".to_owned(),
                        privacy_protocol: PrivacyProtocol::Aes,
                        privacy_passphrase: "privpass".to_owned(),
                        require_privacy: true,
                        ..Default::default()
                    },
                    User {
                        username: "nopriv".to_owned(),
                        auth_passphrase: "secret".to_owned(),
                        engine_id: "0x8000000001020304".to_owned(),
                        ..Default::default()
                    },
                ],
            },
            ..Default::default()
        };
        let rendered = config.render().unwrap();
        assert!(rendered.contains("createUser traptest SHA-256 \"authpass\" AES \"privpass\""));
        assert!(rendered.contains("authUser log traptest priv"));
        assert!(rendered.contains("createUser -e 0x8000000001020304 nopriv SHA \"secret\" AES"));
        assert!(rendered.contains("authUser log nopriv\n"));
    }

    #[test]
    fn render_rejects_empty_username_or_passphrase() {
        let mut config = TrapdConfig::default();
        config.auth.user = vec![User::default()];
        assert!(config.render().is_err());

        config.auth.user = vec![User {
            username: "u".to_owned(),
            ..Default::default()
        }];
        assert!(config.render().is_err());
    }

    #[test]
    fn additional_config_is_appended() {
        let config = TrapdConfig {
            additional_config: "doNotLogTraps yes\n".to_owned(),
            ..Default::default()
        };
        assert!(config.render().unwrap().ends_with("doNotLogTraps yes\n"));
    }

    #[test]
    fn serialize_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snmptrapd.conf");
        TrapdConfig::default().serialize(&path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("pidFile"));
    }

    #[test]
    fn auth_type_names() {
        let t: AuthType = serde_yaml::from_str("sha-512").unwrap();
        assert_eq!(t.as_str(), "SHA-512");
        let t: AuthType = serde_yaml::from_str("md5").unwrap();
        assert_eq!(t.as_str(), "MD5");
        let t: AuthType = serde_yaml::from_str("sha-128").unwrap();
        assert_eq!(t.as_str(), "SHA");
        let p: PrivacyProtocol = serde_yaml::from_str("aes-256").unwrap();
        assert_eq!(p.as_str(), "AES-256");
        let p: PrivacyProtocol = serde_yaml::from_str("des").unwrap();
        assert_eq!(p.as_str(), "DES");
    }
}
