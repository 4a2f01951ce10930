/// HTTP error category for log lines and user-facing messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpErrorCategory {
    Client,     // 4xx errors
    Server,     // 5xx errors
    Auth,       // 401, 403, 407
    RateLimit,  // 429
}

impl std::fmt::Display for HttpErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Client => "client error",
            Self::Server => "server error",
            Self::Auth => "authentication required",
            Self::RateLimit => "rate limited",
        };
        f.write_str(label)
    }
}

/// Reason phrase and category for an HTTP error status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpErrorInfo {
    pub status_code: u16,
    pub category: HttpErrorCategory,
    pub description: String,
}

impl HttpErrorInfo {
    /// Create from HTTP status code
    pub fn from_status(status: u16) -> Self {
        let category = match status {
            401 | 403 | 407 => HttpErrorCategory::Auth,
            429 => HttpErrorCategory::RateLimit,
            _ if status >= 500 => HttpErrorCategory::Server,
            _ => HttpErrorCategory::Client,
        };

        let description = reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|code| code.canonical_reason())
            .map(str::to_string)
            .unwrap_or_else(|| match category {
                HttpErrorCategory::Server => format!("Server Error ({})", status),
                _ if (400..500).contains(&status) => format!("Client Error ({})", status),
                _ => format!("HTTP Error ({})", status),
            });

        Self {
            status_code: status,
            category,
            description,
        }
    }

    /// True for statuses the scheduler treats as failures (>= 400)
    pub fn is_error_status(status: u16) -> bool {
        status >= 400
    }

    /// Format for display
    pub fn format(&self) -> String {
        format!("HTTP {} - {}", self.status_code, self.description)
    }
}
