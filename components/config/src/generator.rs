pub fn generate_toml_config(network: &str) -> String {
    let conf = format!(
        r#"[storage]
working_dir = "data"

[network]
network = "{network}"

[upstream.db]
database = "metaprotocol"
host = "localhost"
port = 5432
username = "postgres"
password = "postgres"

# Alternate ord JSON-RPC source, used by the bitmap indexer when set.
# [upstream]
# ord_rpc_url = "http://localhost:11030/"

[brc20]
enabled = true
lru_cache_size = 50000
extra_tables = true

[brc20.db]
database = "brc20"
host = "localhost"
port = 5432
username = "postgres"
password = "postgres"

[bitmap]
enabled = true

[bitmap.db]
database = "bitmap"
host = "localhost"
port = 5432
username = "postgres"
password = "postgres"

[sns]
enabled = true

[sns.db]
database = "sns"
host = "localhost"
port = 5432
username = "postgres"
password = "postgres"

[report]
enabled = true
name = "metaord_indexer"
url = "https://api.opi.network/report_block"
retries = 10
"#,
        network = network.to_lowercase(),
    );
    conf
}
