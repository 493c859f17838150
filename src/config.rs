/// Configurações da aplicação gateway
/// Todas as configurações são carregadas de variáveis de ambiente
/// Valores padrão são fornecidos para desenvolvimento

/// Estrutura principal de configurações da aplicação
/// Centraliza todas as opções de tuning e endpoints
#[allow(unused)]
#[derive(Clone, Debug)]
pub struct Cfg {
    /// Porta HTTP onde o servidor irá escutar
    pub port: u16,

    /// Caminho do arquivo sqlite do NodeStore
    pub sqlite_path: String,

    /// Header de autenticação admin (obrigatório em `/admin/manifest`)
    pub admin_key: Option<String>,

    /// Zona DNS administrada pelo orquestrador (ex: "consensus.example.com")
    pub dns_zone: String,

    /// Roda em modo local: domínios viram `<id>.localhost`, join não exige pagamento
    pub local_mode: bool,

    /// Timeout total para requisições outbound do dedup proxy (milissegundos)
    pub proxy_timeout_ms: u64,

    /// Máximo de redirects seguidos pelo dedup proxy
    pub proxy_max_redirects: usize,

    /// TTL do cache de respostas (segundos)
    pub cache_ttl_secs: u64,

    /// TTL de um PaidMark (segundos)
    pub paid_mark_ttl_secs: u64,

    /// Intervalo do sweep de PaidMarks (segundos)
    pub paid_mark_sweep_secs: u64,

    /// Intervalo do sweep de SessionTokens pendentes (segundos)
    pub session_token_sweep_secs: u64,

    /// TTL de um SessionToken recém emitido (segundos)
    pub session_token_ttl_secs: u64,

    /// TTL de um JoinRequest (segundos)
    pub join_request_ttl_secs: u64,

    /// Preço base de admissão (menor unidade da moeda de cobrança)
    pub admission_base_price: u64,
    /// Incremento de preço por nó ativo
    pub admission_increment: u64,
    /// Preço máximo de admissão
    pub admission_max_price: u64,

    /// Nota mínima de benchmark exigida para admissão (0-100)
    pub benchmark_admission_threshold: f64,

    /// Timeout de cada probe de benchmark fetch/memory (milissegundos)
    pub benchmark_fetch_timeout_ms: u64,
    /// Timeout do probe de CPU (milissegundos)
    pub benchmark_cpu_timeout_ms: u64,

    /// Janela de tolerância para timestamp de attestation (segundos)
    pub attestation_skew_secs: i64,

    /// Chave pública Ed25519 (hex) usada para verificar manifestos assinados
    pub manifest_signing_pubkey_hex: Option<String>,

    /// Timeout total para requisições HTTP (milissegundos) [herdado do teacher]
    pub request_timeout_ms: u64,

    /// Limite máximo de conexões concorrentes
    pub concurrency_limit: usize,

    /// URL base do facilitator de pagamento (None = facilitator local/dev)
    pub facilitator_url: Option<String>,
    /// Endereço EVM para onde os pagamentos em eip155 são direcionados
    pub pay_to_evm: String,
    /// Endereço Solana para onde os pagamentos em devnet são direcionados
    pub pay_to_solana: String,

    /// URL base do provedor de DNS (None = provedor em memória/dev)
    pub dns_provider_url: Option<String>,
}

impl Cfg {
    /// Carrega configurações de variáveis de ambiente
    /// Fornece valores padrão para desenvolvimento
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            // ========== CONFIGURAÇÃO DO SERVIDOR ==========
            port: std::env::var("PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(9999),

            sqlite_path: std::env::var("SQLITE_PATH")
                .unwrap_or_else(|_| "consensus-gateway.db".into()),

            admin_key: std::env::var("ADMIN_KEY").ok(),

            dns_zone: std::env::var("DNS_ZONE").unwrap_or_else(|_| "consensus.local".into()),

            local_mode: std::env::var("LOCAL_MODE")
                .ok()
                .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
                .unwrap_or(true),

            // ========== DEDUP PROXY ==========
            proxy_timeout_ms: std::env::var("PROXY_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30_000),
            proxy_max_redirects: std::env::var("PROXY_MAX_REDIRECTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            cache_ttl_secs: std::env::var("CACHE_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),
            paid_mark_ttl_secs: std::env::var("PAID_MARK_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),
            paid_mark_sweep_secs: std::env::var("PAID_MARK_SWEEP_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60),

            // ========== SESSION MANAGER ==========
            session_token_sweep_secs: std::env::var("SESSION_TOKEN_SWEEP_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            session_token_ttl_secs: std::env::var("SESSION_TOKEN_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60),

            // ========== ORCHESTRATOR ==========
            join_request_ttl_secs: std::env::var("JOIN_REQUEST_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),
            admission_base_price: std::env::var("ADMISSION_BASE_PRICE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(100),
            admission_increment: std::env::var("ADMISSION_INCREMENT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(50),
            admission_max_price: std::env::var("ADMISSION_MAX_PRICE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
            benchmark_admission_threshold: std::env::var("BENCHMARK_ADMISSION_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60.0),
            benchmark_fetch_timeout_ms: std::env::var("BENCHMARK_FETCH_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5_000),
            benchmark_cpu_timeout_ms: std::env::var("BENCHMARK_CPU_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10_000),
            attestation_skew_secs: std::env::var("ATTESTATION_SKEW_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),
            manifest_signing_pubkey_hex: std::env::var("MANIFEST_SIGNING_PUBKEY_HEX").ok(),

            // ========== TIMEOUTS E PERFORMANCE (herdado do teacher) ==========
            request_timeout_ms: std::env::var("REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30_000),
            concurrency_limit: std::env::var("CONCURRENCY_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1024),

            facilitator_url: std::env::var("FACILITATOR_URL").ok(),
            pay_to_evm: std::env::var("PAY_TO_EVM")
                .unwrap_or_else(|_| "0x0000000000000000000000000000000000dEaD".into()),
            pay_to_solana: std::env::var("PAY_TO_SOLANA")
                .unwrap_or_else(|_| "11111111111111111111111111111111".into()),

            dns_provider_url: std::env::var("DNS_PROVIDER_URL").ok(),
        })
    }

    /// Retorna cópia da configuração com valores sensíveis mascarados
    /// Útil para logging sem expor secrets
    pub fn redacted(&self) -> Self {
        let mut c = self.clone();
        c.admin_key = c.admin_key.as_ref().map(|_| "***".into());
        c
    }
}
